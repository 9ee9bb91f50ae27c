//! Coarse product category classification
//!
//! Two backends:
//! - Lexicon: keyword votes per category, scored locally
//! - Remote: an HTTP text-classification endpoint (Hugging Face inference
//!   response shape)

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::debug;

use crate::config::{CategoryRule, ClassifierBackend, ClassifierSettings};

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier not configured: {0}")]
    NotConfigured(String),
    #[error("classifier request failed: {0}")]
    Request(String),
    #[error("unexpected classifier response: {0}")]
    Response(String),
    #[error("failed to start classifier runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// One candidate label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub label: String,
    pub score: f64,
}

/// Text classification capability
pub trait TextClassifier: Send + Sync {
    /// Candidates ordered by descending score; may be empty
    fn classify(&self, text: &str) -> Result<Vec<CategoryScore>, ClassifyError>;
}

/// Build the classifier named in settings; `None` when disabled
pub fn from_settings(
    settings: &ClassifierSettings,
) -> Result<Option<Box<dyn TextClassifier>>, ClassifyError> {
    match settings.backend {
        ClassifierBackend::Disabled => Ok(None),
        ClassifierBackend::Lexicon => Ok(Some(Box::new(LexiconClassifier::new(
            &settings.categories,
        )?))),
        ClassifierBackend::Remote => Ok(Some(Box::new(RemoteClassifier::new(settings)?))),
    }
}

/// Scores each category by the share of keyword hits it receives
pub struct LexiconClassifier {
    categories: Vec<(String, Vec<Regex>)>,
}

impl LexiconClassifier {
    pub fn new(rules: &[CategoryRule]) -> Result<Self, ClassifyError> {
        let categories = rules
            .iter()
            .map(|rule| {
                let matchers = rule
                    .keywords
                    .iter()
                    .map(|kw| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(kw))))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ClassifyError::NotConfigured(e.to_string()))?;
                Ok((rule.label.clone(), matchers))
            })
            .collect::<Result<Vec<_>, ClassifyError>>()?;
        Ok(Self { categories })
    }
}

impl TextClassifier for LexiconClassifier {
    fn classify(&self, text: &str) -> Result<Vec<CategoryScore>, ClassifyError> {
        let hits: Vec<(&str, usize)> = self
            .categories
            .iter()
            .map(|(label, matchers)| {
                let count = matchers.iter().map(|re| re.find_iter(text).count()).sum();
                (label.as_str(), count)
            })
            .filter(|(_, count)| *count > 0)
            .collect();

        let total: usize = hits.iter().map(|(_, c)| c).sum();
        if total == 0 {
            return Ok(vec![]);
        }

        let mut scores: Vec<CategoryScore> = hits
            .into_iter()
            .map(|(label, count)| CategoryScore {
                label: label.to_string(),
                score: count as f64 / total as f64,
            })
            .collect();
        // stable: configured order breaks ties
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(scores)
    }
}

/// Both shapes the inference API is known to return
#[derive(Deserialize)]
#[serde(untagged)]
enum RemoteResponse {
    Nested(Vec<Vec<CategoryScore>>),
    Flat(Vec<CategoryScore>),
}

impl RemoteResponse {
    fn into_scores(self) -> Vec<CategoryScore> {
        match self {
            RemoteResponse::Nested(batches) => batches.into_iter().next().unwrap_or_default(),
            RemoteResponse::Flat(scores) => scores,
        }
    }
}

/// Parse and order a remote classifier body
fn parse_remote_body(body: &str) -> Result<Vec<CategoryScore>, ClassifyError> {
    let response: RemoteResponse =
        serde_json::from_str(body).map_err(|e| ClassifyError::Response(e.to_string()))?;
    let mut scores = response.into_scores();
    scores.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(scores)
}

/// HTTP text-classification endpoint
pub struct RemoteClassifier {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
    runtime: Runtime,
}

impl RemoteClassifier {
    pub fn new(settings: &ClassifierSettings) -> Result<Self, ClassifyError> {
        let endpoint = settings
            .endpoint
            .clone()
            .ok_or_else(|| ClassifyError::NotConfigured("no endpoint set".to_string()))?;
        let token = settings
            .api_token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ClassifyError::NotConfigured(format!("HTTP client: {e}")))?;
        let runtime = Runtime::new()?;

        Ok(Self {
            endpoint,
            token,
            client,
            runtime,
        })
    }

    async fn request(&self, text: &str) -> anyhow::Result<String> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "inputs": text }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context("Failed to send request")?;
        if !response.status().is_success() {
            anyhow::bail!("classifier returned status {}", response.status());
        }
        response.text().await.context("Failed to read response body")
    }
}

impl TextClassifier for RemoteClassifier {
    fn classify(&self, text: &str) -> Result<Vec<CategoryScore>, ClassifyError> {
        debug!("Classifying {} chars via {}", text.len(), self.endpoint);
        let body = self
            .runtime
            .block_on(self.request(text))
            .map_err(|e| ClassifyError::Request(format!("{e:#}")))?;
        parse_remote_body(&body)
    }
}
