//! Stage adapters: each pairs a store query with one enricher call and one
//! write-back, for the batch executor to drive.

mod embed;
mod entities;
mod score;
mod summarize;
mod topics;

use std::sync::Arc;

use sieve_common::ArticleStore;

use crate::enrichment::Enricher;

pub use embed::EmbedStage;
pub use entities::EntitiesStage;
pub use score::ScoreStage;
pub use summarize::SummarizeStage;
pub use topics::TopicsStage;

/// Collaborators every stage adapter needs.
#[derive(Clone)]
pub struct StageDeps {
    pub store: Arc<dyn ArticleStore>,
    pub enricher: Arc<dyn Enricher>,
}

impl StageDeps {
    pub fn new(store: Arc<dyn ArticleStore>, enricher: Arc<dyn Enricher>) -> Self {
        Self { store, enricher }
    }
}
