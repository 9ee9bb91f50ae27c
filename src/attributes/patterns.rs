//! Pattern library
//!
//! Rule tables for price, dimension, weight, brand and technical-spec
//! extraction, plus whole-word vocabulary lookups for colors, materials and
//! features. Everything here is pure: no I/O, no back-ends.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::record::{keys, AttributeRecord, AttributeValue};
use crate::config::VocabularyConfig;

const NUMBER: &str = r"(\d+(?:\.\d+)?)";

fn compile(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("static pattern compiles"))
        .collect()
}

static PRICE_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\$[\d,]+\.?\d*".to_string(),
        r"USD\s*[\d,]+\.?\d*".to_string(),
        r"Price:\s*[\d,]+\.?\d*".to_string(),
        r"Cost:\s*[\d,]+\.?\d*".to_string(),
    ])
});

static DIMENSION_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        format!(r"{NUMBER}\s*x\s*{NUMBER}\s*x\s*{NUMBER}"),
        format!(r"{NUMBER}\s*cm\s*x\s*{NUMBER}\s*cm"),
        format!(r"{NUMBER}\s*inch\s*x\s*{NUMBER}\s*inch"),
        format!(r"Size:\s*{NUMBER}\s*x\s*{NUMBER}"),
    ])
});

static WEIGHT_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        format!(r"{NUMBER}\s*kg"),
        format!(r"{NUMBER}\s*lb"),
        format!(r"Weight:\s*{NUMBER}\s*kg"),
        format!(r"Weight:\s*{NUMBER}\s*lb"),
    ])
});

static BRAND_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"Brand:\s*([A-Za-z0-9\s]+)".to_string(),
        r"Manufacturer:\s*([A-Za-z0-9\s]+)".to_string(),
        r"Made by:\s*([A-Za-z0-9\s]+)".to_string(),
    ])
});

static RESOLUTION_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(\d+)\s*x\s*(\d+)\s*pixels".to_string(),
        r"(\d+)\s*x\s*(\d+)\s*resolution".to_string(),
        r"(\d+)\s*MP".to_string(),
        r"(\d+)\s*megapixel".to_string(),
    ])
});

static STORAGE_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(\d+)\s*GB".to_string(),
        r"(\d+)\s*TB".to_string(),
        r"(\d+)\s*MB".to_string(),
        r"Storage:\s*(\d+)\s*GB".to_string(),
    ])
});

/// First rule (in declaration order) with any match, leftmost match of that rule
fn first_match<'t>(rules: &[Regex], text: &'t str) -> Option<regex::Captures<'t>> {
    rules.iter().find_map(|rule| rule.captures(text))
}

fn full_match(rules: &[Regex], text: &str) -> Option<String> {
    first_match(rules, text).map(|caps| caps[0].to_string())
}

/// Captured groups of the first match, in group order
fn groups(rules: &[Regex], text: &str) -> Option<Vec<String>> {
    first_match(rules, text).map(|caps| {
        caps.iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str().to_string())
            .collect()
    })
}

/// A word list compiled into whole-word matchers
#[derive(Debug, Clone)]
struct Vocabulary {
    entries: Vec<(String, Regex)>,
}

impl Vocabulary {
    fn new(words: &[String]) -> Result<Self, regex::Error> {
        let entries = words
            .iter()
            .map(|word| {
                let re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word)))?;
                Ok((word.clone(), re))
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { entries })
    }

    /// Every vocabulary word present in the text, in vocabulary order
    fn find_all(&self, text: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(word, _)| word.clone())
            .collect()
    }
}

/// Rule tables plus the configured vocabularies
#[derive(Debug, Clone)]
pub struct PatternLibrary {
    colors: Vocabulary,
    materials: Vocabulary,
    features: Vocabulary,
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::new(&VocabularyConfig::default()).expect("default vocabulary compiles")
    }
}

impl PatternLibrary {
    /// Build the library; fails only if a vocabulary word cannot be compiled
    pub fn new(vocabulary: &VocabularyConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            colors: Vocabulary::new(&vocabulary.colors)?,
            materials: Vocabulary::new(&vocabulary.materials)?,
            features: Vocabulary::new(&vocabulary.features)?,
        })
    }

    pub fn price(&self, text: &str) -> Option<String> {
        full_match(&PRICE_RULES, text)
    }

    pub fn dimensions(&self, text: &str) -> Option<Vec<String>> {
        groups(&DIMENSION_RULES, text)
    }

    pub fn weight(&self, text: &str) -> Option<String> {
        groups(&WEIGHT_RULES, text).and_then(|g| g.into_iter().next())
    }

    pub fn brand(&self, text: &str) -> Option<String> {
        first_match(&BRAND_RULES, text)
            .and_then(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
            .filter(|brand| !brand.is_empty())
    }

    pub fn colors(&self, text: &str) -> Vec<String> {
        self.colors.find_all(text)
    }

    pub fn materials(&self, text: &str) -> Vec<String> {
        self.materials.find_all(text)
    }

    pub fn features(&self, text: &str) -> Vec<String> {
        self.features.find_all(text)
    }

    /// Resolution and storage capacity, each independently optional
    pub fn technical_specs(&self, text: &str) -> BTreeMap<String, String> {
        let mut specs = BTreeMap::new();
        if let Some(resolution) = full_match(&RESOLUTION_RULES, text) {
            specs.insert(keys::RESOLUTION.to_string(), resolution);
        }
        if let Some(storage) = full_match(&STORAGE_RULES, text) {
            specs.insert(keys::STORAGE.to_string(), storage);
        }
        specs
    }

    /// Run every family and collect the keys that found something
    pub fn match_all(&self, text: &str) -> AttributeRecord {
        let mut record = AttributeRecord::new();
        if text.trim().is_empty() {
            return record;
        }

        if let Some(price) = self.price(text) {
            record.insert(keys::PRICE, AttributeValue::Text(price));
        }
        if let Some(dimensions) = self.dimensions(text) {
            record.insert(keys::DIMENSIONS, AttributeValue::List(dimensions));
        }
        if let Some(weight) = self.weight(text) {
            record.insert(keys::WEIGHT, AttributeValue::Text(weight));
        }
        insert_list(&mut record, keys::COLORS, self.colors(text));
        insert_list(&mut record, keys::MATERIALS, self.materials(text));
        if let Some(brand) = self.brand(text) {
            record.insert(keys::BRAND, AttributeValue::Text(brand));
        }
        insert_list(&mut record, keys::FEATURES, self.features(text));

        let specs = self.technical_specs(text);
        if !specs.is_empty() {
            record.insert(keys::TECHNICAL_SPECIFICATIONS, AttributeValue::Map(specs));
        }

        record
    }
}

fn insert_list(record: &mut AttributeRecord, key: &str, items: Vec<String>) {
    if !items.is_empty() {
        record.insert(key, AttributeValue::List(items));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> PatternLibrary {
        PatternLibrary::default()
    }

    #[test]
    fn test_tshirt_example() {
        let record = library().match_all("Red T-Shirt $29.99 Size: M 100% Cotton Brand: Nike");

        assert_eq!(record.get(keys::PRICE).and_then(|v| v.as_text()), Some("$29.99"));
        assert!(record.get(keys::COLORS).unwrap().as_list().unwrap().contains(&"red".to_string()));
        assert!(record
            .get(keys::MATERIALS)
            .unwrap()
            .as_list()
            .unwrap()
            .contains(&"cotton".to_string()));
        assert_eq!(record.get(keys::BRAND).and_then(|v| v.as_text()), Some("Nike"));
        assert!(!record.contains_key(keys::DIMENSIONS));
    }

    #[test]
    fn test_blank_input_has_no_keys() {
        for text in ["", "   ", "\n\t "] {
            assert!(library().match_all(text).is_empty());
        }
    }

    #[test]
    fn test_whole_word_vocabulary() {
        let lib = library();
        assert!(lib.colors("a redder shade of goldenrod").is_empty());
        assert_eq!(lib.colors("RED and Gold trim"), vec!["red", "gold"]);
        assert!(lib.materials("woodland steelers").is_empty());
        assert_eq!(lib.features("USB-C, Wireless charging"), vec!["wireless", "usb"]);
    }

    #[test]
    fn test_price_pattern_order_beats_position() {
        // "Price:" appears first in the text but the "$" rule is declared first
        assert_eq!(
            library().price("Price: 10 or $12.50 today").as_deref(),
            Some("$12.50")
        );
        assert_eq!(library().price("usd 1,299.00").as_deref(), Some("usd 1,299.00"));
        assert_eq!(library().price("Cost: 7").as_deref(), Some("Cost: 7"));
        assert!(library().price("free").is_none());
    }

    #[test]
    fn test_dimensions() {
        let lib = library();
        assert_eq!(
            lib.dimensions("Box 10 x 20.5 X 30").unwrap(),
            vec!["10", "20.5", "30"]
        );
        assert_eq!(lib.dimensions("40cm x 60cm").unwrap(), vec!["40", "60"]);
        assert_eq!(lib.dimensions("Size: 3 x 4").unwrap(), vec!["3", "4"]);
        assert!(lib.dimensions("Size: M").is_none());
    }

    #[test]
    fn test_weight() {
        let lib = library();
        assert_eq!(lib.weight("weighs 2.5 KG").as_deref(), Some("2.5"));
        assert_eq!(lib.weight("Weight: 3lb").as_deref(), Some("3"));
        assert!(lib.weight("heavy").is_none());
    }

    #[test]
    fn test_brand_variants() {
        let lib = library();
        assert_eq!(lib.brand("manufacturer: Acme Corp").as_deref(), Some("Acme Corp"));
        assert_eq!(lib.brand("Made by: Globex, Inc").as_deref(), Some("Globex"));
        assert!(lib.brand("no label here").is_none());
    }

    #[test]
    fn test_technical_specs() {
        let lib = library();
        let specs = lib.technical_specs("Camera 12 MP, 128GB storage");
        assert_eq!(specs.get("resolution").map(String::as_str), Some("12 MP"));
        assert_eq!(specs.get("storage").map(String::as_str), Some("128GB"));

        let specs = lib.technical_specs("1920 x 1080 pixels display");
        assert_eq!(specs.get("resolution").map(String::as_str), Some("1920 x 1080 pixels"));
        assert!(!specs.contains_key("storage"));

        let record = lib.match_all("plain text");
        assert!(!record.contains_key(keys::TECHNICAL_SPECIFICATIONS));
    }

    #[test]
    fn test_custom_vocabulary() {
        let vocabulary = VocabularyConfig {
            colors: vec!["teal".into(), "navy blue".into()],
            materials: vec![],
            features: vec!["wi-fi".into()],
        };
        let lib = PatternLibrary::new(&vocabulary).unwrap();
        assert_eq!(lib.colors("Navy Blue and teal"), vec!["teal", "navy blue"]);
        assert!(lib.colors("red").is_empty());
        assert_eq!(lib.features("built-in Wi-Fi"), vec!["wi-fi"]);
    }
}
