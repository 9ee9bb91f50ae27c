//! Model management for ONNX Runtime
//!
//! Handles downloading, caching, and loading of the PaddleOCR text models and
//! the U²-Net saliency model used for background removal.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ort::session::{builder::GraphOptimizationLevel, Session};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::config::SaliencyModel;

/// Environment variable that forbids network downloads
pub const OFFLINE_ENV: &str = "PRODUCT_LENS_OFFLINE";

/// Model identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Text detection model (DBNet)
    Detection,
    /// Text recognition model (CRNN)
    Recognition,
    /// Character dictionary for recognition
    Dictionary,
    /// Salient object segmentation (U²-Net family)
    Segmentation(SaliencyModel),
}

impl ModelType {
    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::Detection => "det.onnx",
            ModelType::Recognition => "rec.onnx",
            ModelType::Dictionary => "dict.txt",
            ModelType::Segmentation(SaliencyModel::U2netp) => "u2netp.onnx",
            ModelType::Segmentation(SaliencyModel::U2net) => "u2net.onnx",
            ModelType::Segmentation(SaliencyModel::U2netHumanSeg) => "u2net_human_seg.onnx",
        }
    }

    pub fn download_url(&self) -> &'static str {
        match self {
            ModelType::Detection => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/detection/v3/det.onnx"
            }
            ModelType::Recognition => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/rec.onnx"
            }
            ModelType::Dictionary => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/dict.txt"
            }
            ModelType::Segmentation(SaliencyModel::U2netp) => {
                "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2netp.onnx"
            }
            ModelType::Segmentation(SaliencyModel::U2net) => {
                "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2net.onnx"
            }
            ModelType::Segmentation(SaliencyModel::U2netHumanSeg) => {
                "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2net_human_seg.onnx"
            }
        }
    }

    /// Plausible file size in bytes, used as an integrity check
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelType::Detection => (2_000_000, 5_000_000),     // ~2.43 MB
            ModelType::Recognition => (7_000_000, 10_000_000),  // ~7.83 MB
            ModelType::Dictionary => (500, 10_000),             // ~1.42 KB
            ModelType::Segmentation(SaliencyModel::U2netp) => (4_000_000, 6_000_000), // ~4.6 MB
            ModelType::Segmentation(_) => (160_000_000, 190_000_000),                // ~176 MB
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Detection => "Text Detection",
            ModelType::Recognition => "Text Recognition",
            ModelType::Dictionary => "Character Dictionary",
            ModelType::Segmentation(_) => "Background Segmentation",
        }
    }
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: Option<String>,
    pub downloaded_at: String,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Model manager for downloading and caching ONNX models
#[derive(Debug, Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
    offline: bool,
}

impl ModelManager {
    /// Models directory under the platform data dir
    pub fn new() -> Result<Self> {
        let data_dir = crate::storage::get_data_dir()?;
        Self::with_dir(data_dir.join("models"))
    }

    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models dir {:?}", models_dir))?;
        Ok(Self {
            models_dir,
            offline: false,
        })
    }

    /// Configured directory, or the platform default
    pub fn from_settings(models_dir: Option<&Path>, offline: bool) -> Result<Self> {
        let manager = match models_dir {
            Some(dir) => Self::with_dir(dir.to_path_buf())?,
            None => Self::new()?,
        };
        Ok(manager.with_offline(offline))
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    fn is_offline(&self) -> bool {
        self.offline || std::env::var_os(OFFLINE_ENV).is_some()
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    /// Present on disk with a plausible size
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        match std::fs::metadata(self.model_path(model_type)) {
            Ok(metadata) => {
                let (min, max) = model_type.expected_size_range();
                (min..=max).contains(&metadata.len())
            }
            Err(_) => false,
        }
    }

    /// Download a model if not already available; returns its path
    pub fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);

        if self.is_model_available(model_type) {
            debug!("Model {:?} already available at {:?}", model_type, path);
            return Ok(path);
        }

        self.download_model(model_type)?;
        Ok(path)
    }

    fn download_model(&self, model_type: ModelType) -> Result<()> {
        let url = model_type.download_url();
        let path = self.model_path(model_type);

        if self.is_offline() {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        info!("Downloading {} model from {}", model_type.display_name(), url);

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let sha256 = rt.block_on(async { self.download_file_async(url, &path, model_type).await })?;

        if !self.is_model_available(model_type) {
            anyhow::bail!("Download completed but model verification failed");
        }

        self.update_manifest_for_model(model_type, sha256)?;

        info!("Successfully downloaded {} model", model_type.display_name());
        Ok(())
    }

    /// Stream `url` into `path` through a `.tmp` file; returns the SHA256 of the body
    async fn download_file_async(&self, url: &str, path: &Path, model_type: ModelType) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with status {}: {}", response.status(), url);
        }

        let total_size = response.content_length();
        debug!("Download size: {:?} bytes", total_size);

        let temp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;
            file.write_all(&chunk).context("Failed to write to temp file")?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
        }

        file.flush().context("Failed to flush temp file")?;
        drop(file);
        debug!("{:?}: received {} bytes", model_type, downloaded);

        std::fs::rename(&temp_path, path)
            .context("Failed to move downloaded file to final location")?;
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Record a downloaded model in the manifest, replacing any earlier entry
    fn update_manifest_for_model(&self, model_type: ModelType, sha256: String) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();

        let size_bytes = std::fs::metadata(self.model_path(model_type))
            .with_context(|| format!("{} missing after download", model_type.filename()))?
            .len();

        let model_info = ModelInfo {
            model_type: format!("{:?}", model_type),
            filename: model_type.filename().to_string(),
            size_bytes,
            sha256: Some(sha256),
            downloaded_at: unix_timestamp(),
        };

        match manifest
            .models
            .iter_mut()
            .find(|m| m.filename == model_info.filename)
        {
            Some(existing) => *existing = model_info,
            None => manifest.models.push(model_info),
        }

        self.save_manifest(&manifest)
    }

    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(ModelManifest::default())
        }
    }

    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        std::fs::write(manifest_path, serde_json::to_string_pretty(manifest)?)?;
        Ok(())
    }
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
}

impl OnnxSession {
    pub fn new(model_path: &Path) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        debug!(
            "Model loaded. Inputs: {:?}, Outputs: {:?}",
            session.inputs.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            session.outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>()
        );

        Ok(Self { session })
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

/// Seconds since the Unix epoch, as a string
fn unix_timestamp() -> String {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}
