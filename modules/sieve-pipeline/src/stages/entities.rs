use anyhow::Result;
use async_trait::async_trait;

use sieve_common::{Article, EnrichmentStage, EntitySet, StageResult};

use super::StageDeps;
use crate::batch::{BatchStage, OperationOutcome};

pub struct EntitiesStage {
    deps: StageDeps,
}

impl EntitiesStage {
    pub fn new(deps: StageDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl BatchStage for EntitiesStage {
    type Payload = EntitySet;

    fn stage(&self) -> EnrichmentStage {
        EnrichmentStage::ExtractEntities
    }

    async fn fetch_items(&self) -> Result<Vec<Article>> {
        self.deps.store.fetch_pending(self.stage()).await
    }

    async fn operate(&self, article: &Article) -> OperationOutcome<EntitySet> {
        self.deps.enricher.extract_entities(article).await.into()
    }

    async fn persist(&self, article: &Article, payload: EntitySet) -> Result<()> {
        self.deps
            .store
            .persist_stage_result(article.id, StageResult::Entities(payload))
            .await
    }
}
