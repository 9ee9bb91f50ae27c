//! PaddleOCR via ONNX Runtime
//!
//! DB text detection finds line boxes, CRNN recognition reads each line with
//! greedy CTC decoding. Sessions are loaded on first use.

use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use ndarray::{ArrayView2, Ix3, Ix4};
use ort::{inputs, value::TensorRef};
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

use super::models::{ModelManager, ModelType, OnnxSession};
use super::preprocess::{crop_box, preprocess_for_detection, preprocess_for_recognition, PreprocessConfig};
use super::recognizer::{Recognition, RecognizeError, RecognizeOptions, TextRecognizer};

/// DB postprocess thresholds
#[derive(Debug, Clone)]
pub struct DetectionParams {
    /// Probability above which a pixel is text
    pub thresh: f32,
    /// Minimum mean probability inside a box
    pub box_thresh: f32,
    pub unclip_ratio: f32,
    pub max_candidates: usize,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            thresh: 0.3,
            box_thresh: 0.6,
            unclip_ratio: 1.6,
            max_candidates: 1000,
        }
    }
}

/// Text line box in original image coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub score: f32,
}

impl TextBox {
    fn bounds(&self) -> (u32, u32, u32, u32) {
        (
            self.x.max(0.0) as u32,
            self.y.max(0.0) as u32,
            self.width.ceil().max(1.0) as u32,
            self.height.ceil().max(1.0) as u32,
        )
    }
}

/// Single OCR line result
#[derive(Debug, Clone)]
pub struct OcrResult {
    pub text: String,
    pub bounds: TextBox,
    pub confidence: f32,
}

struct PaddleSessions {
    detection: OnnxSession,
    recognition: OnnxSession,
    characters: Vec<String>,
}

/// OCR engine using PaddleOCR via ONNX Runtime
pub struct OcrEngine {
    models: ModelManager,
    preprocess: PreprocessConfig,
    detection: DetectionParams,
    sessions: Mutex<Option<PaddleSessions>>,
}

impl OcrEngine {
    pub fn new(models: ModelManager) -> Self {
        Self {
            models,
            preprocess: PreprocessConfig::default(),
            detection: DetectionParams::default(),
            sessions: Mutex::new(None),
        }
    }

    fn load_sessions(&self) -> Result<PaddleSessions> {
        let det_path = self.models.ensure_model(ModelType::Detection)?;
        let rec_path = self.models.ensure_model(ModelType::Recognition)?;
        let dict_path = self.models.ensure_model(ModelType::Dictionary)?;

        let sessions = PaddleSessions {
            detection: OnnxSession::new(&det_path)?,
            recognition: OnnxSession::new(&rec_path)?,
            characters: load_character_dict(&dict_path)?,
        };
        info!(
            "PaddleOCR ready ({} characters)",
            sessions.characters.len()
        );
        Ok(sessions)
    }

    /// Run detection and recognition over a whole image
    pub fn run(&self, image: &DynamicImage) -> Result<Vec<OcrResult>> {
        let mut guard = self.sessions.lock();
        if guard.is_none() {
            *guard = Some(self.load_sessions()?);
        }
        let sessions = guard
            .as_mut()
            .context("PaddleOCR sessions not loaded")?;

        let boxes = self.detect(&mut sessions.detection, image)?;
        debug!("Detected {} text boxes", boxes.len());

        let mut results = Vec::with_capacity(boxes.len());
        for text_box in boxes {
            let line = crop_box(image, text_box.bounds());
            let (text, confidence) =
                self.recognize_line(&mut sessions.recognition, &sessions.characters, &line)?;
            if !text.is_empty() {
                results.push(OcrResult {
                    text,
                    bounds: text_box,
                    confidence,
                });
            }
        }
        Ok(results)
    }

    fn detect(&self, session: &mut OnnxSession, image: &DynamicImage) -> Result<Vec<TextBox>> {
        let (tensor, scale) = preprocess_for_detection(image, &self.preprocess);
        let input = TensorRef::from_array_view(&tensor)?;
        let outputs = session
            .session_mut()
            .run(inputs![input])
            .context("Detection inference failed")?;

        let map = outputs[0]
            .try_extract_array::<f32>()?
            .into_owned()
            .into_dimensionality::<Ix4>()
            .context("Unexpected detection output shape")?;
        let prob = map.slice(ndarray::s![0, 0, .., ..]);

        Ok(db_postprocess(
            prob,
            scale,
            (image.width(), image.height()),
            &self.detection,
        ))
    }

    fn recognize_line(
        &self,
        session: &mut OnnxSession,
        characters: &[String],
        line: &DynamicImage,
    ) -> Result<(String, f32)> {
        let tensor = preprocess_for_recognition(line, &self.preprocess);
        let input = TensorRef::from_array_view(&tensor)?;
        let outputs = session
            .session_mut()
            .run(inputs![input])
            .context("Recognition inference failed")?;

        let preds = outputs[0]
            .try_extract_array::<f32>()?
            .into_owned()
            .into_dimensionality::<Ix3>()
            .context("Unexpected recognition output shape")?;

        Ok(ctc_greedy_decode(preds.slice(ndarray::s![0, .., ..]), characters))
    }
}

impl TextRecognizer for OcrEngine {
    fn name(&self) -> &'static str {
        "paddleocr"
    }

    fn recognize(
        &self,
        image: &DynamicImage,
        _options: &RecognizeOptions,
    ) -> Result<Recognition, RecognizeError> {
        let lines = self
            .run(image)
            .map_err(|e| RecognizeError::Failed(format!("{e:#}")))?;
        Ok(Recognition::scored(
            lines.into_iter().map(|l| (l.text, l.confidence)),
        ))
    }
}

/// Blank token first, dictionary lines, space last
pub fn load_character_dict(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read character dictionary {:?}", path))?;
    Ok(parse_character_dict(&content))
}

fn parse_character_dict(content: &str) -> Vec<String> {
    let mut characters = vec!["blank".to_string()];
    characters.extend(
        content
            .lines()
            .map(|l| l.trim_end_matches(['\r', '\n']))
            .filter(|l| !l.is_empty())
            .map(str::to_string),
    );
    characters.push(" ".to_string());
    characters
}

/// Probability map to line boxes in original image coordinates
fn db_postprocess(
    prob: ArrayView2<f32>,
    scale: f32,
    original: (u32, u32),
    params: &DetectionParams,
) -> Vec<TextBox> {
    let (height, width) = prob.dim();
    let mask = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        if prob[[y as usize, x as usize]] > params.thresh {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let (orig_w, orig_h) = (original.0 as f32, original.1 as f32);
    let mut boxes = Vec::new();

    for contour in find_contours::<u32>(&mask)
        .iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .take(params.max_candidates)
    {
        let Some((min_x, min_y, max_x, max_y)) = extent(contour.points.iter().map(|p| (p.x, p.y)))
        else {
            continue;
        };
        let (w, h) = ((max_x - min_x) as f32, (max_y - min_y) as f32);
        if w.min(h) < 3.0 {
            continue;
        }

        let score = mean_score(&prob, (min_x, min_y, max_x, max_y));
        if score < params.box_thresh {
            continue;
        }

        // expand by area * ratio / perimeter on every side
        let distance = (w * h) * params.unclip_ratio / (2.0 * (w + h));
        let x0 = ((min_x as f32 - distance) / scale).clamp(0.0, orig_w - 1.0);
        let y0 = ((min_y as f32 - distance) / scale).clamp(0.0, orig_h - 1.0);
        let x1 = ((max_x as f32 + distance) / scale).clamp(0.0, orig_w - 1.0);
        let y1 = ((max_y as f32 + distance) / scale).clamp(0.0, orig_h - 1.0);
        if x1 - x0 <= 3.0 || y1 - y0 <= 3.0 {
            continue;
        }

        boxes.push(TextBox {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
            score,
        });
    }

    sort_reading_order(boxes)
}

fn extent(points: impl Iterator<Item = (u32, u32)>) -> Option<(u32, u32, u32, u32)> {
    points.fold(None, |acc, (x, y)| match acc {
        None => Some((x, y, x, y)),
        Some((x0, y0, x1, y1)) => Some((x0.min(x), y0.min(y), x1.max(x), y1.max(y))),
    })
}

fn mean_score(prob: &ArrayView2<f32>, (x0, y0, x1, y1): (u32, u32, u32, u32)) -> f32 {
    let region = prob.slice(ndarray::s![
        y0 as usize..=y1 as usize,
        x0 as usize..=x1 as usize
    ]);
    region.mean().unwrap_or(0.0)
}

/// Top-to-bottom, then left-to-right for boxes within 10px vertically
fn sort_reading_order(mut boxes: Vec<TextBox>) -> Vec<TextBox> {
    boxes.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));
    for i in 1..boxes.len() {
        let mut j = i;
        while j > 0 && (boxes[j].y - boxes[j - 1].y).abs() < 10.0 && boxes[j].x < boxes[j - 1].x {
            boxes.swap(j, j - 1);
            j -= 1;
        }
    }
    boxes
}

/// Greedy CTC decode: argmax per step, collapse repeats, drop blanks.
/// Confidence is the mean probability of the kept steps.
fn ctc_greedy_decode(preds: ArrayView2<f32>, characters: &[String]) -> (String, f32) {
    let mut text = String::new();
    let mut probs = Vec::new();
    let mut previous = None;

    for row in preds.rows() {
        let Some((index, &prob)) = row.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1)) else {
            continue;
        };
        if index != 0 && previous != Some(index) {
            if let Some(ch) = characters.get(index) {
                text.push_str(ch);
                probs.push(prob);
            }
        }
        previous = Some(index);
    }

    let confidence = if probs.is_empty() {
        0.0
    } else {
        probs.iter().sum::<f32>() / probs.len() as f32
    };
    (text.trim().to_string(), confidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn chars() -> Vec<String> {
        parse_character_dict("a\nb\nc\n")
    }

    fn one_hot(steps: &[usize], classes: usize, prob: f32) -> Array2<f32> {
        let mut preds = Array2::<f32>::zeros((steps.len(), classes));
        for (t, &i) in steps.iter().enumerate() {
            preds[[t, i]] = prob;
        }
        preds
    }

    #[test]
    fn test_dictionary_layout() {
        let characters = chars();
        assert_eq!(characters, vec!["blank", "a", "b", "c", " "]);
    }

    #[test]
    fn test_ctc_collapses_and_drops_blank() {
        // a a _ a b b _ c
        let preds = one_hot(&[1, 1, 0, 1, 2, 2, 0, 3], 5, 0.9);
        let (text, conf) = ctc_greedy_decode(preds.view(), &chars());
        assert_eq!(text, "aabc");
        assert!((conf - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_ctc_all_blank() {
        let preds = one_hot(&[0, 0, 0], 5, 1.0);
        assert_eq!(ctc_greedy_decode(preds.view(), &chars()), (String::new(), 0.0));
    }

    #[test]
    fn test_db_postprocess_finds_block() {
        let mut prob = Array2::<f32>::zeros((64, 128));
        for y in 20..36 {
            for x in 10..90 {
                prob[[y, x]] = 0.95;
            }
        }
        let boxes = db_postprocess(prob.view(), 2.0, (64, 32), &DetectionParams::default());
        assert_eq!(boxes.len(), 1);
        let b = boxes[0];
        assert!(b.score > 0.9);
        assert!(b.x < 5.0 && b.y < 10.0);
        assert!(b.x + b.width > 44.0);
    }

    #[test]
    fn test_db_postprocess_ignores_weak_and_tiny() {
        let mut prob = Array2::<f32>::zeros((32, 32));
        prob[[5, 5]] = 1.0;
        for y in 10..20 {
            for x in 10..20 {
                prob[[y, x]] = 0.35;
            }
        }
        assert!(db_postprocess(prob.view(), 1.0, (32, 32), &DetectionParams::default()).is_empty());
    }

    #[test]
    fn test_reading_order() {
        let b = |x: f32, y: f32| TextBox { x, y, width: 10.0, height: 5.0, score: 1.0 };
        let sorted = sort_reading_order(vec![b(50.0, 2.0), b(0.0, 40.0), b(5.0, 0.0)]);
        assert_eq!(sorted[0].x, 5.0);
        assert_eq!(sorted[1].x, 50.0);
        assert_eq!(sorted[2].y, 40.0);
    }
}
