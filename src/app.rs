//! Application Coordinator
//!
//! Ties the extractors, the background remover and the database together
//! into the three product workflows: process an uploaded image, extract
//! attributes for a product, and list past results.

use anyhow::Context;
use image::ImageFormat;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::attributes::{AttributeExtractor, AttributeRecord};
use crate::background::{self, BackgroundRemover};
use crate::config::AppConfig;
use crate::storage::{self, Database, ProcessedImageRecord, StorageError};
use crate::vision::{ModelManager, TextBundle, TextExtractor, VisionError};

const ORIGINALS_DIR: &str = "original_images";
const PROCESSED_DIR: &str = "processed_images";
const DATABASE_FILE: &str = "product_lens.db";

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("image not found: {0}")]
    ImageNotFound(i64),
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("invalid file type: only JPEG, PNG, GIF and BMP images are allowed")]
    UnsupportedType,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of processing one uploaded image
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub image_id: i64,
    pub extracted_text: TextBundle,
    pub original_image: PathBuf,
    pub processed_image: Option<PathBuf>,
}

/// Result of an attribute extraction request
#[derive(Debug, Clone, Serialize)]
pub struct AttributeOutcome {
    pub image_id: Option<i64>,
    pub attributes: AttributeRecord,
}

/// Main application coordinator
pub struct ProductProcessor {
    db: Database,
    data_dir: PathBuf,
    text: TextExtractor,
    attributes: AttributeExtractor,
    remover: Box<dyn BackgroundRemover>,
    history_limit: usize,
}

impl ProductProcessor {
    pub fn new(
        db: Database,
        data_dir: PathBuf,
        text: TextExtractor,
        attributes: AttributeExtractor,
        remover: Box<dyn BackgroundRemover>,
    ) -> Result<Self, ProcessError> {
        std::fs::create_dir_all(data_dir.join(ORIGINALS_DIR))?;
        std::fs::create_dir_all(data_dir.join(PROCESSED_DIR))?;
        Ok(Self {
            db,
            data_dir,
            text,
            attributes,
            remover,
            history_limit: 50,
        })
    }

    /// Build every component from configuration
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let data_dir = match &config.storage.data_dir {
            Some(dir) => dir.clone(),
            None => storage::get_data_dir()?,
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data dir {:?}", data_dir))?;

        let models =
            ModelManager::from_settings(config.vision.models_dir.as_deref(), config.general.offline)?;
        let db = Database::open(&data_dir.join(DATABASE_FILE))?;
        let text = TextExtractor::from_settings(&config.vision, models.clone());
        let attributes = AttributeExtractor::from_settings(&config.attributes)?;
        let remover =
            background::build_remover(config.background.method.into(), &config.background, models);

        info!("Product processor using data dir {:?}", data_dir);
        Ok(Self::new(db, data_dir, text, attributes, remover)?
            .with_history_limit(config.general.history_limit))
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Store an image, read its text and strip its background
    pub fn process_image(&self, source: &Path) -> Result<ProcessOutcome, ProcessError> {
        if !source.exists() {
            return Err(ProcessError::FileNotFound(source.to_path_buf()));
        }
        let format = detect_format(source)?;
        let extension = format.extensions_str().first().copied().unwrap_or("img");

        let original = self
            .data_dir
            .join(ORIGINALS_DIR)
            .join(format!("{}.{}", uuid::Uuid::new_v4(), extension));
        std::fs::copy(source, &original)?;
        let image_id = self.db.insert_image(&original)?;
        info!("Processing image {} ({:?})", image_id, original);

        let bundle = self.text.extract_all(&original)?;

        let processed = match self.remover.remove(&original) {
            Ok(path) => match self.move_to_processed(&path) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("Failed to store processed image {:?}: {}", path, e);
                    None
                }
            },
            Err(e) => {
                warn!("Background removal failed for image {}: {}", image_id, e);
                None
            }
        };

        if let Some(path) = &processed {
            self.db.set_processed_image(image_id, path)?;
        }
        self.db.set_extracted_text(image_id, &bundle.combined_text)?;

        Ok(ProcessOutcome {
            image_id,
            extracted_text: bundle,
            original_image: original,
            processed_image: processed,
        })
    }

    fn move_to_processed(&self, path: &Path) -> std::io::Result<PathBuf> {
        let file_name = path
            .file_name()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"))?;
        let target = self.data_dir.join(PROCESSED_DIR).join(file_name);
        if std::fs::rename(path, &target).is_err() {
            std::fs::copy(path, &target)?;
            std::fs::remove_file(path)?;
        }
        Ok(target)
    }

    /// Extract attributes, folding in the stored text of `image_id` when given
    pub fn extract_attributes(
        &self,
        title: &str,
        description: &str,
        image_id: Option<i64>,
    ) -> Result<AttributeOutcome, ProcessError> {
        let mut description = description.to_string();
        let mut image_ref = None;

        if let Some(id) = image_id {
            let record = self.db.get(id)?.ok_or(ProcessError::ImageNotFound(id))?;
            if !record.extracted_text.is_empty() {
                description = format!("{description} {}", record.extracted_text)
                    .trim()
                    .to_string();
            }
            image_ref = Some(record.original_image.to_string_lossy().into_owned());
        }

        let attributes = self
            .attributes
            .extract_all(title, &description, image_ref.as_deref());

        if let Some(id) = image_id {
            self.db.set_product_attributes(id, &attributes)?;
        }

        Ok(AttributeOutcome {
            image_id,
            attributes,
        })
    }

    /// Newest records first; `None` uses the configured limit
    pub fn history(&self, limit: Option<usize>) -> Result<Vec<ProcessedImageRecord>, ProcessError> {
        Ok(self.db.history(limit.unwrap_or(self.history_limit))?)
    }
}

/// Sniff the image format from content, falling back to the extension
fn detect_format(path: &Path) -> Result<ImageFormat, ProcessError> {
    let sniffed = image::ImageReader::open(path)?
        .with_guessed_format()?
        .format();
    let format = sniffed.or_else(|| ImageFormat::from_path(path).ok());

    match format {
        Some(f @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::Bmp)) => Ok(f),
        _ => Err(ProcessError::UnsupportedType),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::keys;
    use crate::background::BackgroundError;
    use crate::config::VisionSettings;
    use crate::vision::{Recognition, RecognizeError, RecognizeOptions, TextRecognizer};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct FixedText(&'static str);

    impl TextRecognizer for FixedText {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn recognize(
            &self,
            _image: &image::DynamicImage,
            _options: &RecognizeOptions,
        ) -> Result<Recognition, RecognizeError> {
            Ok(Recognition::plain(self.0))
        }
    }

    struct NoRemoval;

    impl BackgroundRemover for NoRemoval {
        fn name(&self) -> &'static str {
            "none"
        }

        fn remove(&self, _image_path: &Path) -> Result<PathBuf, BackgroundError> {
            Err(BackgroundError::AllMethodsFailed)
        }
    }

    fn processor(dir: &TempDir, remover: Box<dyn BackgroundRemover>) -> ProductProcessor {
        let settings = VisionSettings {
            horizontal_psm: vec![6],
            rotations: vec![],
            ..Default::default()
        };
        let text = TextExtractor::new(
            Arc::new(FixedText("Red cotton shirt")),
            Arc::new(FixedText("")),
            settings,
        );
        ProductProcessor::new(
            Database::open_in_memory().unwrap(),
            dir.path().join("data"),
            text,
            AttributeExtractor::default(),
            remover,
        )
        .unwrap()
    }

    fn upload(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        image::RgbImage::from_pixel(12, 12, image::Rgb([255, 255, 255]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_process_image_stores_everything() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir, Box::new(background::ColorKeyRemover::default()));
        let source = upload(&dir, "shirt.png");

        let outcome = processor.process_image(&source).unwrap();
        assert!(outcome.original_image.starts_with(dir.path().join("data/original_images")));
        assert_eq!(outcome.original_image.extension().unwrap(), "png");
        assert!(outcome.extracted_text.combined_text.contains("Red cotton shirt"));

        let processed = outcome.processed_image.clone().unwrap();
        assert!(processed.starts_with(dir.path().join("data/processed_images")));
        assert!(processed.exists());

        let record = processor.history(None).unwrap().remove(0);
        assert_eq!(record.id, outcome.image_id);
        assert_eq!(record.extracted_text, outcome.extracted_text.combined_text);
        assert_eq!(record.processed_image, Some(processed));
    }

    #[test]
    fn test_failed_background_removal_keeps_record() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir, Box::new(NoRemoval));
        let outcome = processor.process_image(&upload(&dir, "a.png")).unwrap();
        assert!(outcome.processed_image.is_none());
        assert!(!processor.history(None).unwrap()[0].extracted_text.is_empty());
    }

    #[test]
    fn test_rejects_non_images() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir, Box::new(NoRemoval));
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        assert!(matches!(processor.process_image(&path), Err(ProcessError::UnsupportedType)));
        assert!(matches!(
            processor.process_image(&dir.path().join("missing.png")),
            Err(ProcessError::FileNotFound(_))
        ));
        assert!(processor.history(None).unwrap().is_empty());
    }

    #[test]
    fn test_extract_attributes_uses_stored_text() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir, Box::new(NoRemoval));
        let outcome = processor.process_image(&upload(&dir, "b.png")).unwrap();

        let result = processor
            .extract_attributes("Shirt", "Brand: Acme", Some(outcome.image_id))
            .unwrap();
        let colors = result.attributes.get(keys::COLORS).unwrap().as_list().unwrap();
        assert!(colors.contains(&"red".to_string()));
        assert!(result.attributes.metadata().unwrap().has_image);

        let stored = processor.history(None).unwrap().remove(0);
        assert_eq!(stored.product_attributes, result.attributes);
    }

    #[test]
    fn test_extract_attributes_without_image() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir, Box::new(NoRemoval));
        let result = processor.extract_attributes("Blue mug", "", None).unwrap();
        assert!(result.image_id.is_none());
        assert!(!result.attributes.metadata().unwrap().has_image);
    }

    #[test]
    fn test_extract_attributes_unknown_image() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir, Box::new(NoRemoval));
        assert!(matches!(
            processor.extract_attributes("x", "y", Some(99)),
            Err(ProcessError::ImageNotFound(99))
        ));
    }

    #[test]
    fn test_history_limit() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir, Box::new(NoRemoval)).with_history_limit(2);
        let source = upload(&dir, "c.png");
        for _ in 0..3 {
            processor.process_image(&source).unwrap();
        }
        assert_eq!(processor.history(None).unwrap().len(), 2);
        assert_eq!(processor.history(Some(10)).unwrap().len(), 3);
    }
}
