//! Attribute Extraction Layer
//!
//! Turns product title/description text into an [`AttributeRecord`]:
//! pattern families first, then the category classifier, then the keyword
//! summary, then metadata about the input.

pub mod classifier;
pub mod keywords;
pub mod patterns;
pub mod record;

pub use classifier::{CategoryScore, ClassifyError, LexiconClassifier, RemoteClassifier, TextClassifier};
pub use patterns::PatternLibrary;
pub use record::{keys, AttributeRecord, AttributeValue, ExtractionMetadata};

use tracing::{debug, warn};

use crate::config::AttributeSettings;

/// Attribute extraction orchestrator
pub struct AttributeExtractor {
    patterns: PatternLibrary,
    classifier: Option<Box<dyn TextClassifier>>,
}

impl AttributeExtractor {
    /// Create an extractor with explicit parts
    pub fn new(patterns: PatternLibrary, classifier: Option<Box<dyn TextClassifier>>) -> Self {
        Self {
            patterns,
            classifier,
        }
    }

    /// Create an extractor from configuration
    pub fn from_settings(settings: &AttributeSettings) -> anyhow::Result<Self> {
        let patterns = PatternLibrary::new(&settings.vocabulary)?;
        let classifier = classifier::from_settings(&settings.classifier)?;
        Ok(Self::new(patterns, classifier))
    }

    /// Pattern-only extraction, no classifier call
    pub fn extract_basic(&self, text: &str) -> AttributeRecord {
        self.patterns.match_all(text)
    }

    /// Full extraction over title + description
    pub fn extract_all(
        &self,
        title: &str,
        description: &str,
        image_ref: Option<&str>,
    ) -> AttributeRecord {
        let combined = format!("{title} {description}");
        let combined = combined.trim();
        if combined.is_empty() {
            return AttributeRecord::new();
        }

        let mut record = self.patterns.match_all(combined);
        record.merge(self.classify(combined));

        let keywords = keywords::top_keywords(combined, keywords::MAX_KEYWORDS);
        if !keywords.is_empty() {
            record.insert(keys::KEYWORDS, AttributeValue::List(keywords));
        }

        record.set_metadata(ExtractionMetadata {
            text_length: combined.chars().count(),
            has_title: !title.trim().is_empty(),
            has_description: !description.trim().is_empty(),
            has_image: image_ref.is_some_and(|r| !r.is_empty()),
        });

        debug!(
            "Extracted {} attributes from {} chars",
            record.len(),
            combined.len()
        );
        record
    }

    /// Category and confidence from the top candidate; nothing on failure
    fn classify(&self, text: &str) -> AttributeRecord {
        let mut record = AttributeRecord::new();
        let Some(classifier) = &self.classifier else {
            return record;
        };

        match classifier.classify(text) {
            Ok(candidates) => {
                if let Some(top) = candidates.into_iter().next() {
                    record.insert(keys::CATEGORY, AttributeValue::Text(top.label));
                    record.insert(keys::CATEGORY_CONFIDENCE, AttributeValue::Number(top.score));
                }
            }
            Err(e) => warn!("Category classification failed: {}", e),
        }
        record
    }
}

impl Default for AttributeExtractor {
    fn default() -> Self {
        Self::new(PatternLibrary::default(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedClassifier(Vec<CategoryScore>);

    impl TextClassifier for FixedClassifier {
        fn classify(&self, _text: &str) -> Result<Vec<CategoryScore>, ClassifyError> {
            Ok(self.0.clone())
        }
    }

    struct FailingClassifier(Arc<AtomicUsize>);

    impl TextClassifier for FailingClassifier {
        fn classify(&self, _text: &str) -> Result<Vec<CategoryScore>, ClassifyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ClassifyError::Request("offline".to_string()))
        }
    }

    fn with_fixed(scores: Vec<CategoryScore>) -> AttributeExtractor {
        AttributeExtractor::new(
            PatternLibrary::default(),
            Some(Box::new(FixedClassifier(scores))),
        )
    }

    fn apparel() -> Vec<CategoryScore> {
        vec![
            CategoryScore { label: "clothing".into(), score: 0.9 },
            CategoryScore { label: "sports".into(), score: 0.1 },
        ]
    }

    #[test]
    fn test_basic_example() {
        let record = AttributeExtractor::default()
            .extract_basic("Red T-Shirt $29.99 Size: M 100% Cotton Brand: Nike");
        assert!(record.contains_key(keys::PRICE));
        assert!(record.contains_key(keys::COLORS));
        assert!(record.contains_key(keys::MATERIALS));
        assert_eq!(record.get(keys::BRAND).and_then(|v| v.as_text()), Some("Nike"));
        assert!(record.metadata().is_none());
    }

    #[test]
    fn test_blank_input_is_total_noop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let extractor = AttributeExtractor::new(
            PatternLibrary::default(),
            Some(Box::new(FailingClassifier(calls.clone()))),
        );
        for description in ["", " ", "\t\n  "] {
            let record = extractor.extract_all("", description, None);
            assert!(record.is_empty());
            assert_eq!(serde_json::to_string(&record).unwrap(), "{}");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_metadata() {
        let record = with_fixed(vec![]).extract_all("  Lamp ", "", Some("img.png"));
        let meta = record.metadata().unwrap();
        assert_eq!(meta.text_length, "Lamp".chars().count());
        assert!(meta.has_title);
        assert!(!meta.has_description);
        assert!(meta.has_image);

        let record = with_fixed(vec![]).extract_all("Café", "Crème brûlée", None);
        let meta = record.metadata().unwrap();
        assert_eq!(meta.text_length, "Café Crème brûlée".chars().count());
        assert!(meta.has_title && meta.has_description && !meta.has_image);
    }

    #[test]
    fn test_classifier_top_candidate() {
        let record = with_fixed(apparel()).extract_all("Blue hoodie", "", None);
        assert_eq!(record.get(keys::CATEGORY).and_then(|v| v.as_text()), Some("clothing"));
        assert_eq!(
            record.get(keys::CATEGORY_CONFIDENCE).and_then(|v| v.as_number()),
            Some(0.9)
        );
    }

    #[test]
    fn test_classifier_failure_omits_category_only() {
        let extractor = AttributeExtractor::new(
            PatternLibrary::default(),
            Some(Box::new(FailingClassifier(Arc::new(AtomicUsize::new(0))))),
        );
        let record = extractor.extract_all("Green lamp lamp", "steel base", None);
        assert!(!record.contains_key(keys::CATEGORY));
        assert!(!record.contains_key(keys::CATEGORY_CONFIDENCE));
        assert!(record.contains_key(keys::COLORS));
        assert!(record.contains_key(keys::KEYWORDS));
        assert!(record.metadata().is_some());
    }

    #[test]
    fn test_empty_candidates_omit_category() {
        let record = with_fixed(vec![]).extract_all("desk", "", None);
        assert!(!record.contains_key(keys::CATEGORY));
    }

    #[test]
    fn test_keywords() {
        let record = with_fixed(vec![]).extract_all(
            "Lantern",
            "a big lantern for the tent, lantern light is on",
            None,
        );
        let keywords = record.get(keys::KEYWORDS).unwrap().as_list().unwrap();
        assert_eq!(keywords[0], "lantern");
        assert!(keywords.iter().all(|k| k.chars().count() > 3));
    }

    #[test]
    fn test_short_words_only_omit_keywords() {
        let record = with_fixed(vec![]).extract_all("red", "hat", None);
        assert!(!record.contains_key(keys::KEYWORDS));
        assert!(record.contains_key(keys::COLORS));
    }

    #[test]
    fn test_idempotent() {
        let extractor = with_fixed(apparel());
        let title = "Wireless Speaker 2kg";
        let description = "Black aluminum body, 32GB storage, Brand: Acme";
        let first = serde_json::to_vec(&extractor.extract_all(title, description, None)).unwrap();
        let second = serde_json::to_vec(&extractor.extract_all(title, description, None)).unwrap();
        assert_eq!(first, second);
    }
}
