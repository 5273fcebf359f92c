use anyhow::Result;
use async_trait::async_trait;

use sieve_common::{Article, EnrichmentStage, StageResult};

use super::StageDeps;
use crate::batch::{BatchStage, OperationOutcome};

pub struct TopicsStage {
    deps: StageDeps,
}

impl TopicsStage {
    pub fn new(deps: StageDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl BatchStage for TopicsStage {
    type Payload = Vec<String>;

    fn stage(&self) -> EnrichmentStage {
        EnrichmentStage::ClassifyTopics
    }

    async fn fetch_items(&self) -> Result<Vec<Article>> {
        self.deps.store.fetch_pending(self.stage()).await
    }

    async fn operate(&self, article: &Article) -> OperationOutcome<Vec<String>> {
        self.deps.enricher.classify_topics(article).await.into()
    }

    async fn persist(&self, article: &Article, payload: Vec<String>) -> Result<()> {
        self.deps
            .store
            .persist_stage_result(article.id, StageResult::Topics(payload))
            .await
    }
}
