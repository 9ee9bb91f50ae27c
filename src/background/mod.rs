//! Background removal
//!
//! Providers write a transparent PNG next to the input image. `Auto` tries
//! each provider in order and keeps the first success.

pub mod color_key;
pub mod segmentation;

pub use color_key::ColorKeyRemover;
pub use segmentation::SegmentationRemover;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{BackgroundSettings, RemovalMethodSetting};
use crate::vision::ModelManager;

#[derive(Debug, Error)]
pub enum BackgroundError {
    #[error("image not found: {0}")]
    ImageNotFound(PathBuf),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("model error: {0}")]
    Model(String),
    #[error("every removal method failed")]
    AllMethodsFailed,
}

/// Removal method selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalMethod {
    Segmentation,
    ColorKey,
    Auto,
}

impl RemovalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalMethod::Segmentation => "segmentation",
            RemovalMethod::ColorKey => "color-key",
            RemovalMethod::Auto => "auto",
        }
    }
}

impl fmt::Display for RemovalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemovalMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "segmentation" => Ok(RemovalMethod::Segmentation),
            "color-key" | "color_key" => Ok(RemovalMethod::ColorKey),
            "auto" => Ok(RemovalMethod::Auto),
            other => Err(format!(
                "unknown removal method '{other}' (expected segmentation, color-key or auto)"
            )),
        }
    }
}

impl From<RemovalMethodSetting> for RemovalMethod {
    fn from(setting: RemovalMethodSetting) -> Self {
        match setting {
            RemovalMethodSetting::Segmentation => RemovalMethod::Segmentation,
            RemovalMethodSetting::ColorKey => RemovalMethod::ColorKey,
            RemovalMethodSetting::Auto => RemovalMethod::Auto,
        }
    }
}

/// Background removal capability
pub trait BackgroundRemover: Send + Sync {
    fn name(&self) -> &'static str;

    /// Write a background-free copy and return its path
    fn remove(&self, image_path: &Path) -> Result<PathBuf, BackgroundError>;
}

/// `<stem>_no_bg[_<suffix>].png` beside the input
pub fn output_path(input: &Path, suffix: Option<&str>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let name = match suffix {
        Some(suffix) => format!("{stem}_no_bg_{suffix}.png"),
        None => format!("{stem}_no_bg.png"),
    };
    input.with_file_name(name)
}

fn ensure_exists(path: &Path) -> Result<(), BackgroundError> {
    if path.exists() {
        Ok(())
    } else {
        Err(BackgroundError::ImageNotFound(path.to_path_buf()))
    }
}

/// Ordered providers; first success wins
pub struct RemovalChain {
    providers: Vec<Box<dyn BackgroundRemover>>,
}

impl RemovalChain {
    pub fn new(providers: Vec<Box<dyn BackgroundRemover>>) -> Self {
        Self { providers }
    }
}

impl BackgroundRemover for RemovalChain {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn remove(&self, image_path: &Path) -> Result<PathBuf, BackgroundError> {
        ensure_exists(image_path)?;
        for provider in &self.providers {
            match provider.remove(image_path) {
                Ok(path) => {
                    info!("Background removed with {}", provider.name());
                    return Ok(path);
                }
                Err(e) => warn!("{} background removal failed: {}", provider.name(), e),
            }
        }
        Err(BackgroundError::AllMethodsFailed)
    }
}

/// Build the remover for `method`
pub fn build_remover(
    method: RemovalMethod,
    settings: &BackgroundSettings,
    models: ModelManager,
) -> Box<dyn BackgroundRemover> {
    let color_key = || ColorKeyRemover::new(settings.min_value, settings.max_saturation);
    match method {
        RemovalMethod::Segmentation => Box::new(SegmentationRemover::new(models, settings.model)),
        RemovalMethod::ColorKey => Box::new(color_key()),
        RemovalMethod::Auto => Box::new(RemovalChain::new(vec![
            Box::new(SegmentationRemover::new(models, settings.model)),
            Box::new(color_key()),
        ])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Stub {
        result: Option<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl BackgroundRemover for Stub {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn remove(&self, _image_path: &Path) -> Result<PathBuf, BackgroundError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .map(PathBuf::from)
                .ok_or_else(|| BackgroundError::Model("stub failure".into()))
        }
    }

    fn stub(result: Option<&'static str>, calls: &Arc<AtomicUsize>) -> Box<dyn BackgroundRemover> {
        Box::new(Stub {
            result,
            calls: calls.clone(),
        })
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("segmentation".parse::<RemovalMethod>(), Ok(RemovalMethod::Segmentation));
        assert_eq!("Color-Key".parse::<RemovalMethod>(), Ok(RemovalMethod::ColorKey));
        assert_eq!("auto".parse::<RemovalMethod>(), Ok(RemovalMethod::Auto));
        assert!("grabcut".parse::<RemovalMethod>().is_err());
        assert!("".parse::<RemovalMethod>().is_err());
        assert_eq!(RemovalMethod::ColorKey.to_string(), "color-key");
    }

    #[test]
    fn test_output_path() {
        let input = Path::new("/data/original_images/shoe.jpg");
        assert_eq!(output_path(input, None), PathBuf::from("/data/original_images/shoe_no_bg.png"));
        assert_eq!(
            output_path(input, Some("color_key")),
            PathBuf::from("/data/original_images/shoe_no_bg_color_key.png")
        );
    }

    #[test]
    fn test_chain_first_success_wins() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.png");
        std::fs::write(&input, b"x").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let chain = RemovalChain::new(vec![
            stub(None, &calls),
            stub(Some("second.png"), &calls),
            stub(Some("third.png"), &calls),
        ]);
        assert_eq!(chain.remove(&input).unwrap(), PathBuf::from("second.png"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_chain_all_fail() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.png");
        std::fs::write(&input, b"x").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let chain = RemovalChain::new(vec![stub(None, &calls), stub(None, &calls)]);
        assert!(matches!(chain.remove(&input), Err(BackgroundError::AllMethodsFailed)));
    }

    #[test]
    fn test_chain_missing_input() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = RemovalChain::new(vec![stub(Some("x.png"), &calls)]);
        assert!(matches!(
            chain.remove(Path::new("/missing.png")),
            Err(BackgroundError::ImageNotFound(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
