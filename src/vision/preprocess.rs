//! Tensor preprocessing for ONNX models
//!
//! Resizing, normalization, and NCHW conversion for the PaddleOCR models and
//! the saliency model used for background removal.

use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::{s, Array3, Array4};

/// ImageNet statistics
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Longest side after resizing for detection
    pub det_target_size: u32,
    pub det_mean: [f32; 3],
    pub det_std: [f32; 3],
    /// Fixed line height for recognition
    pub rec_target_height: u32,
    pub rec_max_width: u32,
    /// Recognition maps [0, 255] to [-1, 1]
    pub rec_mean: [f32; 3],
    pub rec_std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            det_target_size: 960,
            det_mean: IMAGENET_MEAN,
            det_std: IMAGENET_STD,
            rec_target_height: 48,
            rec_max_width: 640,
            rec_mean: [0.5, 0.5, 0.5],
            rec_std: [0.5, 0.5, 0.5],
        }
    }
}

/// RGB image to an HWC array scaled to 0-1
pub fn rgb_to_f32(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let mut normalized = image.clone();
    for ((_, _, c), value) in normalized.indexed_iter_mut() {
        *value = (*value - mean[c]) / std[c];
    }
    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    Array4::from_shape_fn((1, c, h, w), |(_, ch, y, x)| image[[y, x, ch]])
}

/// Scale so the longest side is `target_size`, then pad bottom/right with
/// zeros to multiples of 32. Returns (tensor source, scale factor).
pub fn resize_for_detection(image: &DynamicImage, target_size: u32) -> (Array3<f32>, f32) {
    let (w, h) = (image.width().max(1), image.height().max(1));
    let scale = target_size as f32 / h.max(w) as f32;
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);

    let resized = image.resize_exact(new_w, new_h, FilterType::Triangle).to_rgb8();
    let data = rgb_to_f32(&resized);

    let padded_h = (new_h as usize).div_ceil(32) * 32;
    let padded_w = (new_w as usize).div_ceil(32) * 32;
    let mut padded = Array3::<f32>::zeros((padded_h, padded_w, 3));
    padded
        .slice_mut(s![..new_h as usize, ..new_w as usize, ..])
        .assign(&data);

    (padded, scale)
}

/// Fixed height, proportional width capped at `max_width`
pub fn resize_for_recognition(image: &DynamicImage, target_height: u32, max_width: u32) -> Array3<f32> {
    let (w, h) = (image.width().max(1), image.height().max(1));
    let scale = target_height as f32 / h as f32;
    let new_w = ((w as f32 * scale).ceil() as u32).clamp(1, max_width);

    let resized = image
        .resize_exact(new_w, target_height, FilterType::Triangle)
        .to_rgb8();
    rgb_to_f32(&resized)
}

/// Crop an axis-aligned box `(x, y, width, height)`, clamped to the image
pub fn crop_box(image: &DynamicImage, bounds: (u32, u32, u32, u32)) -> DynamicImage {
    let (x, y, w, h) = bounds;
    let x = x.min(image.width().saturating_sub(1));
    let y = y.min(image.height().saturating_sub(1));
    let w = w.min(image.width() - x).max(1);
    let h = h.min(image.height() - y).max(1);
    image.crop_imm(x, y, w, h)
}

/// Full preprocessing pipeline for detection
pub fn preprocess_for_detection(image: &DynamicImage, config: &PreprocessConfig) -> (Array4<f32>, f32) {
    let (resized, scale) = resize_for_detection(image, config.det_target_size);
    let normalized = normalize(&resized, &config.det_mean, &config.det_std);
    (hwc_to_nchw(&normalized), scale)
}

/// Full preprocessing pipeline for recognition
pub fn preprocess_for_recognition(line: &DynamicImage, config: &PreprocessConfig) -> Array4<f32> {
    let resized = resize_for_recognition(line, config.rec_target_height, config.rec_max_width);
    let normalized = normalize(&resized, &config.rec_mean, &config.rec_std);
    hwc_to_nchw(&normalized)
}

/// Square resize with max-value scaling then ImageNet normalization
pub fn preprocess_for_saliency(image: &DynamicImage, size: u32) -> Array4<f32> {
    let resized = image.resize_exact(size, size, FilterType::Lanczos3).to_rgb8();
    let mut data = rgb_to_f32(&resized);
    let max = data.iter().cloned().fold(0.0f32, f32::max);
    if max > 0.0 {
        data.mapv_inplace(|v| v / max);
    }
    hwc_to_nchw(&normalize(&data, &IMAGENET_MEAN, &IMAGENET_STD))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_rgb_to_f32() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 128]));

        let rgb = rgb_to_f32(&img);
        assert_eq!(rgb.dim(), (1, 2, 3));
        assert!((rgb[[0, 0, 0]] - 1.0).abs() < 0.01);
        assert!(rgb[[0, 0, 1]].abs() < 0.01);
        assert!((rgb[[0, 1, 2]] - 0.502).abs() < 0.01);
    }

    #[test]
    fn test_hwc_to_nchw() {
        let hwc = Array3::<f32>::from_shape_fn((10, 20, 3), |(h, w, c)| (h * 100 + w * 10 + c) as f32);
        let nchw = hwc_to_nchw(&hwc);
        assert_eq!(nchw.dim(), (1, 3, 10, 20));
        assert_eq!(nchw[[0, 1, 5, 10]], hwc[[5, 10, 1]]);
    }

    #[test]
    fn test_normalize() {
        let image = Array3::<f32>::from_elem((2, 2, 3), 0.5);
        let normalized = normalize(&image, &IMAGENET_MEAN, &IMAGENET_STD);
        assert!((normalized[[0, 0, 0]] - (0.5 - 0.485) / 0.229).abs() < 0.01);
        assert!((normalized[[1, 1, 2]] - (0.5 - 0.406) / 0.225).abs() < 0.01);
    }

    #[test]
    fn test_detection_pads_to_multiple_of_32() {
        let img = DynamicImage::new_rgb8(100, 50);
        let (tensor, scale) = preprocess_for_detection(&img, &PreprocessConfig::default());
        assert!((scale - 9.6).abs() < 1e-4);
        let (_, c, h, w) = tensor.dim();
        assert_eq!(c, 3);
        assert_eq!(h % 32, 0);
        assert_eq!(w % 32, 0);
        assert_eq!(w, 960);
        assert_eq!(h, 480);
    }

    #[test]
    fn test_recognition_height_and_cap() {
        let config = PreprocessConfig::default();
        let wide = DynamicImage::new_rgb8(4000, 20);
        let tensor = preprocess_for_recognition(&wide, &config);
        assert_eq!(tensor.dim(), (1, 3, 48, 640));

        let short = DynamicImage::new_rgb8(10, 24);
        assert_eq!(preprocess_for_recognition(&short, &config).dim(), (1, 3, 48, 20));
    }

    #[test]
    fn test_crop_box_clamps() {
        let img = DynamicImage::new_rgb8(10, 10);
        let crop = crop_box(&img, (8, 8, 50, 50));
        assert_eq!((crop.width(), crop.height()), (2, 2));
    }

    #[test]
    fn test_saliency_shape() {
        let img = DynamicImage::new_rgb8(37, 11);
        assert_eq!(preprocess_for_saliency(&img, 320).dim(), (1, 3, 320, 320));
    }
}
