//! Salient-object segmentation with U²-Net-p via ONNX Runtime

use anyhow::Context;
use image::{imageops::FilterType, DynamicImage, GrayImage, Luma, RgbaImage};
use ndarray::{ArrayView2, Ix4};
use ort::{inputs, value::TensorRef};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ensure_exists, output_path, BackgroundError, BackgroundRemover};
use crate::config::SaliencyModel;
use crate::vision::preprocess::preprocess_for_saliency;
use crate::vision::{ModelManager, ModelType, OnnxSession};

/// Model input edge length, shared by every U²-Net checkpoint
const INPUT_SIZE: u32 = 320;

pub struct SegmentationRemover {
    models: ModelManager,
    model: SaliencyModel,
    session: Mutex<Option<OnnxSession>>,
}

impl SegmentationRemover {
    pub fn new(models: ModelManager, model: SaliencyModel) -> Self {
        Self {
            models,
            model,
            session: Mutex::new(None),
        }
    }

    /// Foreground mask at the image's own size
    fn predict_mask(&self, image: &DynamicImage) -> anyhow::Result<GrayImage> {
        let mut guard = self.session.lock();
        if guard.is_none() {
            let path = self.models.ensure_model(ModelType::Segmentation(self.model))?;
            *guard = Some(OnnxSession::new(&path)?);
        }
        let session = guard.as_mut().context("segmentation session not loaded")?;

        let tensor = preprocess_for_saliency(image, INPUT_SIZE);
        let input = TensorRef::from_array_view(&tensor)?;
        let outputs = session
            .session_mut()
            .run(inputs![input])
            .context("Segmentation inference failed")?;

        let prediction = outputs[0]
            .try_extract_array::<f32>()?
            .into_owned()
            .into_dimensionality::<Ix4>()
            .context("Unexpected segmentation output shape")?;

        Ok(mask_from_prediction(
            prediction.slice(ndarray::s![0, 0, .., ..]),
            image.width(),
            image.height(),
        ))
    }
}

impl BackgroundRemover for SegmentationRemover {
    fn name(&self) -> &'static str {
        "segmentation"
    }

    fn remove(&self, image_path: &Path) -> Result<PathBuf, BackgroundError> {
        ensure_exists(image_path)?;
        let image = image::open(image_path)?;
        let mask = self
            .predict_mask(&image)
            .map_err(|e| BackgroundError::Model(format!("{e:#}")))?;

        let out = output_path(image_path, None);
        apply_mask(&image, &mask).save(&out)?;
        debug!("Segmentation output written to {:?}", out);
        Ok(out)
    }
}

/// Min-max normalize the saliency map and scale it to `width` x `height`
fn mask_from_prediction(prediction: ArrayView2<f32>, width: u32, height: u32) -> GrayImage {
    let (rows, cols) = prediction.dim();
    let min = prediction.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = prediction.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let range = (max - min).max(f32::EPSILON);

    let small = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        let v = (prediction[[y as usize, x as usize]] - min) / range;
        Luma([(v * 255.0).round().clamp(0.0, 255.0) as u8])
    });
    image::imageops::resize(&small, width, height, FilterType::Lanczos3)
}

/// Use the mask as the alpha channel
fn apply_mask(image: &DynamicImage, mask: &GrayImage) -> RgbaImage {
    let mut rgba = image.to_rgba8();
    for (pixel, alpha) in rgba.pixels_mut().zip(mask.pixels()) {
        pixel[3] = alpha[0];
    }
    rgba
}
