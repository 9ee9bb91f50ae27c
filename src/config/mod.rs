//! Application Configuration
//!
//! User settings stored in TOML format. Every section falls back to its
//! defaults when missing from the file.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Text extraction settings
    pub vision: VisionSettings,
    /// Attribute extraction settings
    pub attributes: AttributeSettings,
    /// Background removal settings
    pub background: BackgroundSettings,
    /// Persistence settings
    pub storage: StorageSettings,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default number of records returned by `history`
    pub history_limit: usize,
    /// Refuse to download models (same effect as `PRODUCT_LENS_OFFLINE`)
    pub offline: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            offline: false,
        }
    }
}

/// Which engine serves the high-accuracy pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighAccuracyBackend {
    /// PaddleOCR via ONNX Runtime
    #[default]
    Paddle,
    /// Tesseract in TSV mode (word-level confidence)
    TesseractTsv,
}

/// Text extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    /// Tesseract executable
    pub tesseract_cmd: String,
    /// Tesseract language
    pub language: String,
    /// Page segmentation modes for the horizontal pass, in order
    pub horizontal_psm: Vec<u8>,
    /// Page segmentation mode for rotated and embossed passes
    pub single_block_psm: u8,
    /// Rotation angles (degrees, counter-clockwise) for the vertical pass
    pub rotations: Vec<u16>,
    /// Median filter radius used as the denoise step
    pub denoise_radius: u32,
    /// Adaptive threshold block size (odd)
    pub adaptive_block_size: u32,
    /// Constant subtracted from the local Gaussian mean
    pub adaptive_c: i16,
    /// Spans at or below this confidence are dropped by the high-accuracy pass
    pub min_confidence: f32,
    /// Engine for the high-accuracy pass
    pub high_accuracy_backend: HighAccuracyBackend,
    /// Run the four passes concurrently
    pub parallel_passes: bool,
    /// Per-pass timeout; `None` waits indefinitely. Also bounds each tesseract
    /// run, so a timed-out pass does not keep its process alive. A PaddleOCR
    /// inference in flight is not interrupted and finishes in the background.
    pub pass_timeout_secs: Option<u64>,
    /// Custom model directory (defaults to the data dir)
    pub models_dir: Option<PathBuf>,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            tesseract_cmd: "tesseract".to_string(),
            language: "eng".to_string(),
            horizontal_psm: vec![6, 3, 4],
            single_block_psm: 6,
            rotations: vec![90, 180, 270],
            denoise_radius: 1,
            adaptive_block_size: 11,
            adaptive_c: 2,
            min_confidence: 0.5,
            high_accuracy_backend: HighAccuracyBackend::Paddle,
            parallel_passes: true,
            pass_timeout_secs: Some(120),
            models_dir: None,
        }
    }
}

/// Attribute extraction settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeSettings {
    /// Word lists for vocabulary families
    pub vocabulary: VocabularyConfig,
    /// Coarse category classifier
    pub classifier: ClassifierSettings,
}

/// Word lists matched as whole words, case-insensitively
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabularyConfig {
    pub colors: Vec<String>,
    pub materials: Vec<String>,
    pub features: Vec<String>,
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        Self {
            colors: words(&[
                "red", "blue", "green", "yellow", "black", "white", "gray", "grey", "brown",
                "purple", "pink", "orange", "silver", "gold", "bronze",
            ]),
            materials: words(&[
                "wood", "metal", "plastic", "glass", "fabric", "leather", "cotton", "steel",
                "aluminum", "ceramic", "rubber", "silk", "wool", "nylon",
            ]),
            features: words(&[
                "waterproof", "durable", "lightweight", "portable", "adjustable",
                "rechargeable", "wireless", "bluetooth", "wifi", "usb", "hdmi", "touchscreen",
                "backlit", "ergonomic", "antimicrobial", "stainless",
            ]),
        }
    }
}

/// Classifier backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierBackend {
    /// Keyword lexicon scored locally
    #[default]
    Lexicon,
    /// HTTP text-classification endpoint
    Remote,
    /// No classification
    Disabled,
}

/// Keywords that vote for one category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub label: String,
    pub keywords: Vec<String>,
}

/// Coarse category classifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub backend: ClassifierBackend,
    /// Endpoint for the remote backend
    pub endpoint: Option<String>,
    /// Environment variable holding a bearer token for the endpoint
    pub api_token_env: Option<String>,
    /// Request timeout for the remote backend
    pub timeout_secs: u64,
    /// Lexicon used by the local backend
    pub categories: Vec<CategoryRule>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            backend: ClassifierBackend::Lexicon,
            endpoint: None,
            api_token_env: Some("PRODUCT_LENS_CLASSIFIER_TOKEN".to_string()),
            timeout_secs: 30,
            categories: vec![
                rule("electronics", &[
                    "electronic", "device", "battery", "charger", "usb", "hdmi", "bluetooth",
                    "wireless", "wifi", "screen", "display", "camera", "laptop", "phone",
                    "headphones", "speaker",
                ]),
                rule("clothing", &[
                    "shirt", "t-shirt", "dress", "jacket", "pants", "jeans", "sweater", "hoodie",
                    "cotton", "wool", "silk", "size", "sleeve", "shoes", "sneakers",
                ]),
                rule("furniture", &[
                    "chair", "table", "desk", "sofa", "shelf", "cabinet", "drawer", "bed",
                    "wood", "ergonomic",
                ]),
                rule("kitchen", &[
                    "kitchen", "cookware", "knife", "pan", "pot", "ceramic", "stainless", "mug",
                    "bottle", "blender",
                ]),
                rule("sports", &[
                    "sport", "fitness", "running", "yoga", "ball", "bike", "outdoor",
                    "waterproof", "training",
                ]),
                rule("beauty", &[
                    "skin", "cream", "lotion", "makeup", "hair", "fragrance", "serum",
                ]),
                rule("toys", &["toy", "kids", "game", "puzzle", "doll", "lego"]),
            ],
        }
    }
}

/// Background removal method name accepted in config and on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemovalMethodSetting {
    Segmentation,
    ColorKey,
    #[default]
    Auto,
}

/// U²-Net checkpoint used for segmentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaliencyModel {
    /// Small general model (~4.6 MB)
    #[default]
    U2netp,
    /// Full general model (~176 MB)
    U2net,
    /// Full model trained on people
    U2netHumanSeg,
}

/// Background removal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundSettings {
    pub method: RemovalMethodSetting,
    /// Segmentation checkpoint
    pub model: SaliencyModel,
    /// Minimum HSV value (0-255) treated as light background
    pub min_value: u8,
    /// Maximum HSV saturation (0-255) treated as light background
    pub max_saturation: u8,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            method: RemovalMethodSetting::Auto,
            model: SaliencyModel::U2netp,
            min_value: 200,
            max_saturation: 30,
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Root for the database and media folders (defaults to the data dir)
    pub data_dir: Option<PathBuf>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

fn rule(label: &str, keywords: &[&str]) -> CategoryRule {
    CategoryRule {
        label: label.to_string(),
        keywords: words(keywords),
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
