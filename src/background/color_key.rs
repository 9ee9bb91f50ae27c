//! Light-background keying in HSV space

use image::{DynamicImage, Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ensure_exists, output_path, BackgroundError, BackgroundRemover};

/// Makes low-saturation, high-value pixels transparent
pub struct ColorKeyRemover {
    min_value: u8,
    max_saturation: u8,
}

impl ColorKeyRemover {
    pub fn new(min_value: u8, max_saturation: u8) -> Self {
        Self {
            min_value,
            max_saturation,
        }
    }

    fn is_background(&self, [r, g, b]: [u8; 3]) -> bool {
        let (saturation, value) = saturation_value(r, g, b);
        saturation <= self.max_saturation && value >= self.min_value
    }

    /// RGBA copy with keyed pixels cleared
    pub fn key_out(&self, image: &DynamicImage) -> RgbaImage {
        let rgb = image.to_rgb8();
        RgbaImage::from_fn(rgb.width(), rgb.height(), |x, y| {
            let pixel = rgb.get_pixel(x, y).0;
            if self.is_background(pixel) {
                Rgba([0, 0, 0, 0])
            } else {
                Rgba([pixel[0], pixel[1], pixel[2], 255])
            }
        })
    }
}

impl Default for ColorKeyRemover {
    fn default() -> Self {
        Self::new(200, 30)
    }
}

impl BackgroundRemover for ColorKeyRemover {
    fn name(&self) -> &'static str {
        "color-key"
    }

    fn remove(&self, image_path: &Path) -> Result<PathBuf, BackgroundError> {
        ensure_exists(image_path)?;
        let image = image::open(image_path)?;
        let keyed = self.key_out(&image);

        let out = output_path(image_path, Some("color_key"));
        keyed.save(&out)?;
        debug!("Color-key output written to {:?}", out);
        Ok(out)
    }
}

/// HSV saturation and value on a 0-255 scale
fn saturation_value(r: u8, g: u8, b: u8) -> (u8, u8) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max == 0 {
        return (0, 0);
    }
    let saturation = ((max - min) as u32 * 255 + max as u32 / 2) / max as u32;
    (saturation as u8, max)
}
