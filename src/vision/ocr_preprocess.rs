//! Image transforms applied before each recognition pass
//!
//! Every pass starts from the grayscale image and reshapes it for a
//! particular kind of text: flat printed labels, rotated labels, or
//! embossed/raised lettering.

use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::filter::{gaussian_blur_f32, median_filter};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::morphology::{grayscale_close, grayscale_open, Mask};
use tracing::debug;

/// Grayscale conversion shared by every pass
pub fn to_gray(image: &DynamicImage) -> GrayImage {
    image.to_luma8()
}

/// Median denoise. Radius 0 returns the input unchanged.
pub fn denoise(gray: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 {
        return gray.clone();
    }
    median_filter(gray, radius, radius)
}

/// Gaussian sigma matching a square kernel of `block_size` pixels
fn block_sigma(block_size: u32) -> f32 {
    let k = block_size.max(3) as f32;
    0.3 * ((k - 1.0) * 0.5 - 1.0) + 0.8
}

/// Gaussian-weighted adaptive threshold.
/// A pixel turns white when it is brighter than its local weighted mean minus `c`.
pub fn adaptive_threshold(gray: &GrayImage, block_size: u32, c: i16) -> GrayImage {
    let local_mean = gaussian_blur_f32(gray, block_sigma(block_size));
    let mut out = GrayImage::new(gray.width(), gray.height());

    for (x, y, pixel) in gray.enumerate_pixels() {
        let mean = local_mean.get_pixel(x, y)[0] as i16;
        let value = if pixel[0] as i16 > mean - c { 255 } else { 0 };
        out.put_pixel(x, y, Luma([value]));
    }
    out
}

/// Horizontal pass: denoise then adaptive threshold
pub fn prepare_horizontal(gray: &GrayImage, denoise_radius: u32, block_size: u32, c: i16) -> GrayImage {
    let denoised = denoise(gray, denoise_radius);
    adaptive_threshold(&denoised, block_size, c)
}

/// Rotate counter-clockwise by `degrees` about the center.
/// The canvas keeps its size; uncovered corners are black.
pub fn rotate(gray: &GrayImage, degrees: u16) -> GrayImage {
    let theta = -(degrees as f32).to_radians();
    rotate_about_center(gray, theta, Interpolation::Bilinear, Luma([0]))
}

/// Embossed pass: gray + top-hat - black-hat, then Otsu binarization
pub fn prepare_embossed(gray: &GrayImage) -> GrayImage {
    let enhanced = emboss_enhance(gray);
    let level = otsu_level(&enhanced);
    debug!("Embossed pass Otsu level {}", level);
    binarize(&enhanced, level)
}

/// Boost raised and recessed strokes with 3x3 grayscale morphology
pub fn emboss_enhance(gray: &GrayImage) -> GrayImage {
    let kernel = Mask::square(1);
    let opened = grayscale_open(gray, &kernel);
    let closed = grayscale_close(gray, &kernel);
    let mut out = GrayImage::new(gray.width(), gray.height());

    for (x, y, pixel) in gray.enumerate_pixels() {
        let g = pixel[0];
        let tophat = g.saturating_sub(opened.get_pixel(x, y)[0]);
        let blackhat = closed.get_pixel(x, y)[0].saturating_sub(g);
        out.put_pixel(x, y, Luma([g.saturating_add(tophat).saturating_sub(blackhat)]));
    }
    out
}

/// Binary threshold: strictly above `level` becomes white
pub fn binarize(gray: &GrayImage, level: u8) -> GrayImage {
    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        pixel[0] = if pixel[0] > level { 255 } else { 0 };
    }
    out
}
