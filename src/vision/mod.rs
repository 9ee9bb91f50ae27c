//! Vision/OCR Layer
//!
//! Reads product text from an image with four independent passes:
//! - Horizontal: denoise + adaptive threshold, several page segmentation modes
//! - Vertical: the grayscale image rotated 90/180/270 degrees
//! - Embossed: morphology-enhanced, Otsu-binarized
//! - High accuracy: a separate confidence-scored backend on the original image
//!
//! Each pass runs on its own worker thread. Results are merged in that fixed
//! order regardless of which pass finishes first.

pub mod models;
pub mod ocr;
pub mod ocr_preprocess;
pub mod preprocess;
pub mod recognizer;
pub mod tesseract;

pub use models::{ModelManager, ModelType, OnnxSession};
pub use ocr::{OcrEngine, OcrResult};
pub use recognizer::{Recognition, RecognizeError, RecognizeOptions, TextRecognizer, TextSpan};
pub use tesseract::TesseractRecognizer;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use image::DynamicImage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{HighAccuracyBackend, VisionSettings};

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("image not found: {0}")]
    ImageNotFound(PathBuf),
}

/// The four extraction passes, in merge order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    Horizontal,
    Vertical,
    Embossed,
    HighAccuracy,
}

impl Pass {
    pub const ALL: [Pass; 4] = [
        Pass::Horizontal,
        Pass::Vertical,
        Pass::Embossed,
        Pass::HighAccuracy,
    ];
}

/// Which image variant a recognizer call saw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Variant {
    Horizontal { psm: u8 },
    Rotated { degrees: u16 },
    Embossed,
    HighAccuracy,
}

/// One recognizer invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub variant: Variant,
    pub raw_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// How a pass ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum PassOutcome {
    Text,
    Empty,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassReport {
    pub pass: Pass,
    pub outcome: PassOutcome,
    /// Merged text of the pass; empty unless `outcome` is `Text`
    pub text: String,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<RecognitionResult>,
}

impl PassReport {
    fn failed(pass: Pass, reason: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            pass,
            outcome: PassOutcome::Failed(reason.into()),
            text: String::new(),
            elapsed_ms: elapsed.as_millis() as u64,
            attempts: Vec::new(),
        }
    }

    fn timed_out(pass: Pass, elapsed: Duration) -> Self {
        Self {
            outcome: PassOutcome::TimedOut,
            ..Self::failed(pass, "", elapsed)
        }
    }
}

/// Text found by every pass plus the merged result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBundle {
    pub horizontal_text: String,
    pub vertical_text: String,
    pub embossed_text: String,
    pub high_accuracy_text: String,
    pub combined_text: String,
    pub passes: Vec<PassReport>,
}

impl TextBundle {
    /// Assemble from reports; passes without a report count as failed
    fn from_reports(mut reports: BTreeMap<Pass, PassReport>) -> Self {
        let passes: Vec<PassReport> = Pass::ALL
            .iter()
            .map(|&pass| {
                reports
                    .remove(&pass)
                    .unwrap_or_else(|| PassReport::failed(pass, "no report", Duration::ZERO))
            })
            .collect();

        let text = |pass: Pass| passes[pass as usize].text.trim().to_string();
        let combined_text = Pass::ALL
            .iter()
            .map(|&pass| text(pass))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            horizontal_text: text(Pass::Horizontal),
            vertical_text: text(Pass::Vertical),
            embossed_text: text(Pass::Embossed),
            high_accuracy_text: text(Pass::HighAccuracy),
            combined_text,
            passes,
        }
    }

    pub fn text(&self, pass: Pass) -> &str {
        match pass {
            Pass::Horizontal => &self.horizontal_text,
            Pass::Vertical => &self.vertical_text,
            Pass::Embossed => &self.embossed_text,
            Pass::HighAccuracy => &self.high_accuracy_text,
        }
    }

    pub fn report(&self, pass: Pass) -> &PassReport {
        &self.passes[pass as usize]
    }
}

/// Shared state handed to each pass worker
struct PassContext {
    image: DynamicImage,
    primary: Arc<dyn TextRecognizer>,
    high_accuracy: Arc<dyn TextRecognizer>,
    settings: VisionSettings,
}

/// Multi-pass text extraction orchestrator
pub struct TextExtractor {
    primary: Arc<dyn TextRecognizer>,
    high_accuracy: Arc<dyn TextRecognizer>,
    settings: VisionSettings,
    pass_timeout: Option<Duration>,
}

impl TextExtractor {
    pub fn new(
        primary: Arc<dyn TextRecognizer>,
        high_accuracy: Arc<dyn TextRecognizer>,
        settings: VisionSettings,
    ) -> Self {
        let pass_timeout = settings.pass_timeout_secs.map(Duration::from_secs);
        Self {
            primary,
            high_accuracy,
            settings,
            pass_timeout,
        }
    }

    /// Tesseract for the preprocessed passes, the configured backend for high accuracy
    pub fn from_settings(settings: &VisionSettings, models: ModelManager) -> Self {
        // a pass that times out must not leave its tesseract process running
        let tesseract = || {
            TesseractRecognizer::new(settings.tesseract_cmd.clone(), settings.language.clone())
                .with_timeout(settings.pass_timeout_secs.map(Duration::from_secs))
        };
        let primary: Arc<dyn TextRecognizer> = Arc::new(tesseract());
        let high_accuracy: Arc<dyn TextRecognizer> = match settings.high_accuracy_backend {
            HighAccuracyBackend::Paddle => Arc::new(OcrEngine::new(models)),
            HighAccuracyBackend::TesseractTsv => Arc::new(tesseract().with_tsv()),
        };
        info!(
            "Text extraction using {} + {}",
            primary.name(),
            high_accuracy.name()
        );
        Self::new(primary, high_accuracy, settings.clone())
    }

    pub fn with_pass_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pass_timeout = timeout;
        self
    }

    /// Run every pass over the image at `path`.
    /// Fails only when the path does not exist; any other problem yields empty pass text.
    pub fn extract_all(&self, path: &Path) -> Result<TextBundle, VisionError> {
        if !path.exists() {
            return Err(VisionError::ImageNotFound(path.to_path_buf()));
        }

        let start = Instant::now();
        let image = match image::open(path) {
            Ok(image) => image,
            Err(e) => {
                warn!("Failed to decode {:?}: {}", path, e);
                let reason = format!("image decode failed: {e}");
                let reports = Pass::ALL
                    .iter()
                    .map(|&pass| (pass, PassReport::failed(pass, reason.clone(), start.elapsed())))
                    .collect();
                return Ok(TextBundle::from_reports(reports));
            }
        };

        let bundle = self.extract_from_image(image);
        info!(
            "Extracted {} chars from {:?} in {:?}",
            bundle.combined_text.len(),
            path,
            start.elapsed()
        );
        Ok(bundle)
    }

    /// Run every pass over an already decoded image
    pub fn extract_from_image(&self, image: DynamicImage) -> TextBundle {
        let context = Arc::new(PassContext {
            image,
            primary: self.primary.clone(),
            high_accuracy: self.high_accuracy.clone(),
            settings: self.settings.clone(),
        });

        let reports = if self.settings.parallel_passes {
            let (tx, rx) = crossbeam_channel::unbounded();
            for pass in Pass::ALL {
                spawn_pass(pass, context.clone(), tx.clone());
            }
            drop(tx);
            collect_reports(&rx, &Pass::ALL, self.pass_timeout)
        } else {
            let mut reports = BTreeMap::new();
            for pass in Pass::ALL {
                let (tx, rx) = crossbeam_channel::bounded(1);
                spawn_pass(pass, context.clone(), tx);
                reports.extend(collect_reports(&rx, &[pass], self.pass_timeout));
            }
            reports
        };

        TextBundle::from_reports(reports)
    }
}

fn spawn_pass(pass: Pass, context: Arc<PassContext>, tx: Sender<PassReport>) {
    let spawned = thread::Builder::new()
        .name(format!("pass-{pass:?}").to_lowercase())
        .spawn(move || {
            let report = run_pass(pass, &context);
            // receiver is gone after a timeout
            let _ = tx.send(report);
        });
    if let Err(e) = spawned {
        warn!("Failed to start {:?} pass: {}", pass, e);
    }
}

/// Wait for the listed passes. Missing reports become `TimedOut` after the
/// deadline, or `Failed` if every worker exited without reporting.
fn collect_reports(
    rx: &Receiver<PassReport>,
    pending: &[Pass],
    timeout: Option<Duration>,
) -> BTreeMap<Pass, PassReport> {
    let start = Instant::now();
    let deadline = timeout.map(|t| start + t);
    let mut reports = BTreeMap::new();

    while reports.len() < pending.len() {
        let received = match deadline {
            Some(deadline) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(report) => {
                debug!("{:?} pass finished: {:?}", report.pass, report.outcome);
                reports.insert(report.pass, report);
            }
            Err(RecvTimeoutError::Timeout) => {
                for pass in missing(pending, &reports) {
                    warn!("{:?} pass timed out after {:?}", pass, start.elapsed());
                    reports.insert(pass, PassReport::timed_out(pass, start.elapsed()));
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                for pass in missing(pending, &reports) {
                    warn!("{:?} pass worker exited without a result", pass);
                    reports.insert(pass, PassReport::failed(pass, "worker exited", start.elapsed()));
                }
            }
        }
    }
    reports
}

fn missing(pending: &[Pass], reports: &BTreeMap<Pass, PassReport>) -> Vec<Pass> {
    pending
        .iter()
        .copied()
        .filter(|p| !reports.contains_key(p))
        .collect()
}

fn run_pass(pass: Pass, context: &PassContext) -> PassReport {
    let start = Instant::now();
    let attempts = match pass {
        Pass::Horizontal => horizontal_pass(context),
        Pass::Vertical => vertical_pass(context),
        Pass::Embossed => embossed_pass(context),
        Pass::HighAccuracy => high_accuracy_pass(context),
    };
    let elapsed = start.elapsed();

    match attempts {
        Ok(attempts) => {
            let text = join_non_empty(attempts.iter().map(|a| a.raw_text.as_str()));
            let outcome = if text.is_empty() {
                PassOutcome::Empty
            } else {
                PassOutcome::Text
            };
            PassReport {
                pass,
                outcome,
                text,
                elapsed_ms: elapsed.as_millis() as u64,
                attempts,
            }
        }
        Err(e) => {
            warn!("Error in {:?} text extraction: {}", pass, e);
            PassReport::failed(pass, e.to_string(), elapsed)
        }
    }
}

fn attempt(
    recognizer: &dyn TextRecognizer,
    image: &DynamicImage,
    options: RecognizeOptions,
    variant: Variant,
) -> Result<RecognitionResult, RecognizeError> {
    let recognition = recognizer.recognize(image, &options)?;
    Ok(RecognitionResult {
        variant,
        raw_text: recognition.text(),
        confidence: recognition.mean_confidence(),
    })
}

fn horizontal_pass(context: &PassContext) -> Result<Vec<RecognitionResult>, RecognizeError> {
    let settings = &context.settings;
    let gray = ocr_preprocess::to_gray(&context.image);
    let prepared = DynamicImage::ImageLuma8(ocr_preprocess::prepare_horizontal(
        &gray,
        settings.denoise_radius,
        settings.adaptive_block_size,
        settings.adaptive_c,
    ));

    settings
        .horizontal_psm
        .iter()
        .map(|&psm| {
            attempt(
                context.primary.as_ref(),
                &prepared,
                RecognizeOptions::psm(psm),
                Variant::Horizontal { psm },
            )
        })
        .collect()
}

fn vertical_pass(context: &PassContext) -> Result<Vec<RecognitionResult>, RecognizeError> {
    let settings = &context.settings;
    let gray = ocr_preprocess::to_gray(&context.image);

    settings
        .rotations
        .iter()
        .map(|&degrees| {
            let rotated = DynamicImage::ImageLuma8(ocr_preprocess::rotate(&gray, degrees));
            attempt(
                context.primary.as_ref(),
                &rotated,
                RecognizeOptions::psm(settings.single_block_psm),
                Variant::Rotated { degrees },
            )
        })
        .collect()
}

fn embossed_pass(context: &PassContext) -> Result<Vec<RecognitionResult>, RecognizeError> {
    let gray = ocr_preprocess::to_gray(&context.image);
    let prepared = DynamicImage::ImageLuma8(ocr_preprocess::prepare_embossed(&gray));
    let result = attempt(
        context.primary.as_ref(),
        &prepared,
        RecognizeOptions::psm(context.settings.single_block_psm),
        Variant::Embossed,
    )?;
    Ok(vec![result])
}

fn high_accuracy_pass(context: &PassContext) -> Result<Vec<RecognitionResult>, RecognizeError> {
    let recognition = context
        .high_accuracy
        .recognize(&context.image, &RecognizeOptions::default())?;
    Ok(vec![RecognitionResult {
        variant: Variant::HighAccuracy,
        raw_text: recognition.confident_text(context.settings.min_confidence),
        confidence: recognition.mean_confidence(),
    }])
}

fn join_non_empty<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
