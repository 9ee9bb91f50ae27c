//! Text recognition backend abstraction

use image::DynamicImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecognizeError {
    #[error("backend not available: {0}")]
    BackendNotAvailable(String),
    #[error("recognition failed: {0}")]
    Failed(String),
    #[error("image error: {0}")]
    Image(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-call options understood by backends that support them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecognizeOptions {
    /// Tesseract-style page segmentation mode
    pub page_segmentation: Option<u8>,
}

impl RecognizeOptions {
    pub fn psm(mode: u8) -> Self {
        Self {
            page_segmentation: Some(mode),
        }
    }
}

/// A recognized piece of text
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    /// 0.0 - 1.0 when the backend scores spans
    pub confidence: Option<f32>,
}

/// Everything one backend call recognized
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    pub spans: Vec<TextSpan>,
}

impl Recognition {
    /// A single unscored block of text
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            spans: vec![TextSpan {
                text: text.into(),
                confidence: None,
            }],
        }
    }

    pub fn scored(spans: impl IntoIterator<Item = (String, f32)>) -> Self {
        Self {
            spans: spans
                .into_iter()
                .map(|(text, confidence)| TextSpan {
                    text,
                    confidence: Some(confidence),
                })
                .collect(),
        }
    }

    /// All span text joined with spaces
    pub fn text(&self) -> String {
        self.spans
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Spans scored above `threshold`, joined with spaces. Unscored spans are dropped.
    pub fn confident_text(&self, threshold: f32) -> String {
        self.spans
            .iter()
            .filter(|s| s.confidence.is_some_and(|c| c > threshold))
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Mean confidence over scored spans
    pub fn mean_confidence(&self) -> Option<f32> {
        let scores: Vec<f32> = self.spans.iter().filter_map(|s| s.confidence).collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f32>() / scores.len() as f32)
        }
    }
}

/// A swappable OCR engine
pub trait TextRecognizer: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn recognize(
        &self,
        image: &DynamicImage,
        options: &RecognizeOptions,
    ) -> Result<Recognition, RecognizeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confident_text_filters_strictly() {
        let recognition = Recognition {
            spans: vec![
                TextSpan { text: "keep".into(), confidence: Some(0.9) },
                TextSpan { text: "edge".into(), confidence: Some(0.5) },
                TextSpan { text: "drop".into(), confidence: Some(0.2) },
                TextSpan { text: "plain".into(), confidence: None },
                TextSpan { text: "also".into(), confidence: Some(0.51) },
            ],
        };
        assert_eq!(recognition.confident_text(0.5), "keep also");
        assert_eq!(recognition.text(), "keep edge drop plain also");
    }

    #[test]
    fn test_mean_confidence() {
        assert_eq!(Recognition::plain("x").mean_confidence(), None);
        let scored = Recognition::scored(vec![("a".to_string(), 0.5), ("b".to_string(), 1.0)]);
        assert!((scored.mean_confidence().unwrap() - 0.75).abs() < 1e-6);
    }
}
