use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use sieve_common::{Article, EnrichmentStage, StageResult, Summary, ThreadStore};

use super::StageDeps;
use crate::batch::{BatchStage, OperationOutcome};

/// Related articles passed along with each summary request.
const CONTEXT_LIMIT: usize = 5;

/// Related coverage is searched this many days back.
const CONTEXT_WINDOW_DAYS: i64 = 30;

/// Summaries written with related earlier coverage in the prompt. The related
/// articles are the nearest embedded neighbours of the article's title.
pub struct SummarizeStage {
    deps: StageDeps,
    threads: Arc<dyn ThreadStore>,
    backfill: bool,
}

impl SummarizeStage {
    /// Summarize articles that have no summary yet.
    pub fn new(deps: StageDeps, threads: Arc<dyn ThreadStore>) -> Self {
        Self {
            deps,
            threads,
            backfill: false,
        }
    }

    /// Redo summaries that were written without related coverage.
    pub fn backfill(deps: StageDeps, threads: Arc<dyn ThreadStore>) -> Self {
        Self {
            deps,
            threads,
            backfill: true,
        }
    }

    /// Related coverage for `article`. A failed lookup yields none.
    async fn related(&self, article: &Article) -> Vec<Article> {
        match self.lookup_related(article).await {
            Ok(related) => related,
            Err(e) => {
                warn!(
                    article_id = article.id,
                    error = %e,
                    "Context search failed, summarizing without context"
                );
                Vec::new()
            }
        }
    }

    async fn lookup_related(&self, article: &Article) -> Result<Vec<Article>> {
        let query = self.deps.enricher.embed_text(&article.title).await?;
        let ids = self
            .threads
            .nearest_by_embedding(&query, CONTEXT_LIMIT, CONTEXT_WINDOW_DAYS, article.id)
            .await?;
        self.deps.store.articles_by_ids(&ids).await
    }
}

#[async_trait]
impl BatchStage for SummarizeStage {
    type Payload = Summary;

    fn stage(&self) -> EnrichmentStage {
        EnrichmentStage::Summarize
    }

    async fn fetch_items(&self) -> Result<Vec<Article>> {
        if self.backfill {
            self.deps.store.fetch_needing_context().await
        } else {
            self.deps.store.fetch_pending(self.stage()).await
        }
    }

    async fn operate(&self, article: &Article) -> OperationOutcome<Summary> {
        let context = self.related(article).await;
        if !context.is_empty() {
            debug!(article_id = article.id, related = context.len(), "Found context articles");
        }
        self.deps
            .enricher
            .summarize(article, &context)
            .await
            .map(|summary| Summary {
                context_article_ids: context.iter().map(|a| a.id).collect(),
                ..summary
            })
            .into()
    }

    async fn persist(&self, article: &Article, payload: Summary) -> Result<()> {
        self.deps
            .store
            .persist_stage_result(article.id, StageResult::Summary(payload))
            .await
    }
}
