//! Enrichment collaborator: the per-article model calls behind each stage.

mod ollama;
pub mod parse;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use ai_client::OllamaError;
use sieve_common::{Article, Embedding, EntitySet, Summary};

use crate::scoring::DimensionScores;

pub use ollama::OllamaEnricher;

/// Why an enrichment call failed. The first three will fail every following
/// item too, so a batch stops on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connection,
    ModelNotFound,
    ServerError,
    Timeout,
    Api,
    EmptyResponse,
    Parse,
    Unknown,
}

impl FailureKind {
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            FailureKind::Connection | FailureKind::ModelNotFound | FailureKind::ServerError
        )
    }
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EnrichError {
    pub kind: FailureKind,
    pub message: String,
}

impl EnrichError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Parse, message)
    }

    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

impl From<OllamaError> for EnrichError {
    fn from(e: OllamaError) -> Self {
        let kind = match &e {
            OllamaError::Connection { .. } => FailureKind::Connection,
            OllamaError::ModelNotFound(_) => FailureKind::ModelNotFound,
            OllamaError::ServerError(_) => FailureKind::ServerError,
            OllamaError::Timeout { .. } => FailureKind::Timeout,
            OllamaError::Api(_) => FailureKind::Api,
            OllamaError::EmptyResponse => FailureKind::EmptyResponse,
        };
        Self::new(kind, e.to_string())
    }
}

/// One call per stage per article, plus the daily briefing.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Summarize `article`. `context` holds related earlier coverage, possibly
    /// empty, which the summary should relate the article to.
    async fn summarize(
        &self,
        article: &Article,
        context: &[Article],
    ) -> Result<Summary, EnrichError>;

    async fn embed(&self, article: &Article) -> Result<Embedding, EnrichError>;

    /// Embed free text, such as a title used as a similarity query.
    async fn embed_text(&self, text: &str) -> Result<Embedding, EnrichError>;

    async fn score(&self, article: &Article) -> Result<DimensionScores, EnrichError>;

    async fn extract_entities(&self, article: &Article) -> Result<EntitySet, EnrichError>;

    async fn classify_topics(&self, article: &Article) -> Result<Vec<String>, EnrichError>;

    /// Write a briefing from the formatted article material.
    async fn generate_digest(&self, material: &str) -> Result<String, EnrichError>;
}
