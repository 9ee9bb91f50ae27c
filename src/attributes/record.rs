//! Attribute record produced by extraction

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known attribute names
pub mod keys {
    pub const PRICE: &str = "price";
    pub const DIMENSIONS: &str = "dimensions";
    pub const WEIGHT: &str = "weight";
    pub const COLORS: &str = "colors";
    pub const MATERIALS: &str = "materials";
    pub const BRAND: &str = "brand";
    pub const FEATURES: &str = "features";
    pub const TECHNICAL_SPECIFICATIONS: &str = "technical_specifications";
    pub const RESOLUTION: &str = "resolution";
    pub const STORAGE: &str = "storage";
    pub const CATEGORY: &str = "category";
    pub const CATEGORY_CONFIDENCE: &str = "category_confidence";
    pub const KEYWORDS: &str = "keywords";
}

/// Value of a single attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            AttributeValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            AttributeValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Facts about the input an attribute record was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    /// Character count of the trimmed title + description
    pub text_length: usize,
    pub has_title: bool,
    pub has_description: bool,
    pub has_image: bool,
}

/// Attributes keyed by name. A key is present only when something was found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    #[serde(flatten)]
    attributes: BTreeMap<String, AttributeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extraction_metadata: Option<ExtractionMetadata>,
}

impl AttributeRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an attribute
    pub fn insert(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.attributes.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Attribute names in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Number of attributes, not counting metadata
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.extraction_metadata.is_none()
    }

    /// Merge `other` into `self`; keys from `other` win
    pub fn merge(&mut self, other: AttributeRecord) {
        self.attributes.extend(other.attributes);
        if other.extraction_metadata.is_some() {
            self.extraction_metadata = other.extraction_metadata;
        }
    }

    pub fn metadata(&self) -> Option<&ExtractionMetadata> {
        self.extraction_metadata.as_ref()
    }

    pub fn set_metadata(&mut self, metadata: ExtractionMetadata) {
        self.extraction_metadata = Some(metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record_serializes_to_empty_object() {
        let record = AttributeRecord::new();
        assert!(record.is_empty());
        assert_eq!(serde_json::to_string(&record).unwrap(), "{}");
    }

    #[test]
    fn test_merge_later_wins() {
        let mut first = AttributeRecord::new();
        first.insert(keys::BRAND, AttributeValue::Text("Acme".into()));
        first.insert(keys::PRICE, AttributeValue::Text("$5".into()));

        let mut second = AttributeRecord::new();
        second.insert(keys::BRAND, AttributeValue::Text("Globex".into()));

        first.merge(second);
        assert_eq!(first.get(keys::BRAND).and_then(|v| v.as_text()), Some("Globex"));
        assert_eq!(first.get(keys::PRICE).and_then(|v| v.as_text()), Some("$5"));
    }

    #[test]
    fn test_json_shape() {
        let mut record = AttributeRecord::new();
        record.insert(keys::COLORS, AttributeValue::List(vec!["red".into()]));
        record.insert(keys::CATEGORY_CONFIDENCE, AttributeValue::Number(0.75));
        record.insert(
            keys::TECHNICAL_SPECIFICATIONS,
            AttributeValue::Map(BTreeMap::from([(keys::STORAGE.to_string(), "64GB".to_string())])),
        );
        record.set_metadata(ExtractionMetadata {
            text_length: 12,
            has_title: true,
            has_description: false,
            has_image: false,
        });

        assert_eq!(
            record.keys().collect::<Vec<_>>(),
            vec![keys::CATEGORY_CONFIDENCE, keys::COLORS, keys::TECHNICAL_SPECIFICATIONS]
        );
        let specs = record
            .get(keys::TECHNICAL_SPECIFICATIONS)
            .and_then(|v| v.as_map())
            .unwrap();
        assert_eq!(specs.get(keys::STORAGE).map(String::as_str), Some("64GB"));
        assert!(record.get(keys::COLORS).unwrap().as_map().is_none());

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["colors"][0], "red");
        assert_eq!(value["category_confidence"], 0.75);
        assert_eq!(value["technical_specifications"]["storage"], "64GB");
        assert_eq!(value["extraction_metadata"]["text_length"], 12);

        let parsed: AttributeRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
    }
}
