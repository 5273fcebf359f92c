use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use sieve_common::{Article, EnrichmentStage, StageResult};

use super::StageDeps;
use crate::batch::{BatchStage, OperationOutcome};
use crate::scoring::{self, DimensionScores};

/// Scores each article and stores the derived composite, tier and convergence
/// alongside the raw dimensions.
pub struct ScoreStage {
    deps: StageDeps,
}

impl ScoreStage {
    pub fn new(deps: StageDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl BatchStage for ScoreStage {
    type Payload = DimensionScores;

    fn stage(&self) -> EnrichmentStage {
        EnrichmentStage::Score
    }

    async fn fetch_items(&self) -> Result<Vec<Article>> {
        self.deps.store.fetch_pending(self.stage()).await
    }

    async fn operate(&self, article: &Article) -> OperationOutcome<DimensionScores> {
        self.deps.enricher.score(article).await.into()
    }

    async fn persist(&self, article: &Article, payload: DimensionScores) -> Result<()> {
        let scores = scoring::derive(payload);
        debug!(
            article_id = article.id,
            composite = scores.composite,
            tier = scores.tier,
            convergence = scores.convergence,
            "Scored article"
        );
        self.deps
            .store
            .persist_stage_result(article.id, StageResult::Scores(scores))
            .await
    }
}
