use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use sieve_common::{Article, Embedding, EnrichmentStage, StageResult};

use super::StageDeps;
use crate::batch::{BatchStage, OperationOutcome};

pub struct EmbedStage {
    deps: StageDeps,
}

impl EmbedStage {
    pub fn new(deps: StageDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl BatchStage for EmbedStage {
    type Payload = Embedding;

    fn stage(&self) -> EnrichmentStage {
        EnrichmentStage::Embed
    }

    async fn fetch_items(&self) -> Result<Vec<Article>> {
        self.deps.store.fetch_pending(self.stage()).await
    }

    async fn operate(&self, article: &Article) -> OperationOutcome<Embedding> {
        self.deps.enricher.embed(article).await.into()
    }

    async fn persist(&self, article: &Article, payload: Embedding) -> Result<()> {
        debug!(article_id = article.id, dims = payload.dims(), "Storing embedding");
        self.deps
            .store
            .persist_stage_result(article.id, StageResult::Embedding(payload))
            .await
    }
}
