//! ProductLens - text, background and attribute extraction for product photos
//!
//! Reads printed, rotated and embossed text off a product image, removes the
//! background, and turns titles and descriptions into structured attributes
//! (price, size, weight, colors, materials, brand, features, specs, category).

pub mod app;
pub mod attributes;
pub mod background;
pub mod config;
pub mod storage;
pub mod vision;

use std::path::Path;

use crate::attributes::{AttributeExtractor, AttributeRecord};
use crate::config::AppConfig;
use crate::vision::{ModelManager, TextBundle, TextExtractor};

/// Run every text pass over an image with default settings
pub fn extract_all_text(image_path: &Path) -> anyhow::Result<TextBundle> {
    let config = AppConfig::default();
    let models = ModelManager::from_settings(None, config.general.offline)?;
    let extractor = TextExtractor::from_settings(&config.vision, models);
    Ok(extractor.extract_all(image_path)?)
}

/// Full attribute extraction with the default vocabulary and lexicon classifier
pub fn extract_all_attributes(
    title: &str,
    description: &str,
    image_ref: Option<&str>,
) -> anyhow::Result<AttributeRecord> {
    let extractor = AttributeExtractor::from_settings(&AppConfig::default().attributes)?;
    Ok(extractor.extract_all(title, description, image_ref))
}

/// Pattern-only attribute extraction
pub fn extract_basic_attributes(text: &str) -> AttributeRecord {
    AttributeExtractor::default().extract_basic(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::keys;

    #[test]
    fn test_extract_basic_attributes() {
        let record = extract_basic_attributes("Red T-Shirt $29.99 Size: M 100% Cotton Brand: Nike");
        assert_eq!(record.get(keys::PRICE).and_then(|v| v.as_text()), Some("$29.99"));
        assert_eq!(record.get(keys::BRAND).and_then(|v| v.as_text()), Some("Nike"));
    }

    #[test]
    fn test_extract_all_attributes() {
        let record = extract_all_attributes("Wireless headphones", "Black, bluetooth, 20 hours", None)
            .unwrap();
        assert_eq!(record.get(keys::CATEGORY).and_then(|v| v.as_text()), Some("electronics"));
        assert!(record.contains_key(keys::KEYWORDS));
        assert!(record.metadata().is_some());

        assert!(extract_all_attributes("", "   ", None).unwrap().is_empty());
    }
}
