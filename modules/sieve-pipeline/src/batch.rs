//! Batch executor shared by every enrichment stage.
//!
//! Items are processed one at a time. A fatal failure stops the batch at once;
//! three retryable failures in a row stop it too. Per-item failures are
//! recorded in the result, never raised. A failed write-back is raised.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use sieve_common::{Article, EnrichmentStage};

use crate::enrichment::EnrichError;

/// Consecutive retryable failures that stop a batch.
pub const MAX_CONSECUTIVE_FAILURES: usize = 3;

/// Per-item progress: `(current, total)`, 1-based.
pub type BatchProgress<'a> = &'a (dyn Fn(usize, usize) -> Result<()> + Send + Sync);

/// Outcome of one stage operation on one item.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome<P> {
    Success(P),
    /// Counted as a failure; the batch moves on to the next item.
    Retryable(String),
    /// Every following item would fail the same way.
    Fatal(String),
}

impl<P> From<Result<P, EnrichError>> for OperationOutcome<P> {
    fn from(result: Result<P, EnrichError>) -> Self {
        match result {
            Ok(payload) => OperationOutcome::Success(payload),
            Err(e) if e.is_fatal() => OperationOutcome::Fatal(e.message),
            Err(e) => OperationOutcome::Retryable(e.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub last_error: Option<String>,
    pub stopped_early: bool,
}

impl BatchResult {
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }
}

impl std::fmt::Display for BatchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} succeeded, {} failed", self.succeeded, self.failed)?;
        if self.stopped_early {
            write!(f, " (stopped early)")?;
        }
        Ok(())
    }
}

/// One enrichment stage as seen by the batch executor.
#[async_trait]
pub trait BatchStage: Send + Sync {
    type Payload: Send;

    fn stage(&self) -> EnrichmentStage;

    /// Work items for this stage, in processing order.
    async fn fetch_items(&self) -> Result<Vec<Article>>;

    async fn operate(&self, article: &Article) -> OperationOutcome<Self::Payload>;

    /// Write a successful payload back to storage.
    async fn persist(&self, article: &Article, payload: Self::Payload) -> Result<()>;
}

/// Run `stage` over `items`.
pub async fn run_batch<S>(
    stage: &S,
    items: &[Article],
    on_progress: Option<BatchProgress<'_>>,
) -> Result<BatchResult>
where
    S: BatchStage + ?Sized,
{
    let mut result = BatchResult::default();
    let total = items.len();
    let mut consecutive_failures = 0;

    for (i, article) in items.iter().enumerate() {
        let stop = match stage.operate(article).await {
            OperationOutcome::Success(payload) => {
                stage.persist(article, payload).await?;
                result.succeeded += 1;
                consecutive_failures = 0;
                false
            }
            OperationOutcome::Retryable(message) => {
                result.failed += 1;
                result.errors.push(format!("Article {}: {message}", article.id));
                consecutive_failures += 1;
                warn!(
                    stage = %stage.stage(),
                    article_id = article.id,
                    consecutive_failures,
                    error = %message,
                    "Item failed"
                );
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    result.last_error = Some(format!(
                        "Stopped after {MAX_CONSECUTIVE_FAILURES} consecutive failures. Last: {message}"
                    ));
                    true
                } else {
                    result.last_error = Some(message);
                    false
                }
            }
            OperationOutcome::Fatal(message) => {
                result.failed += 1;
                result.errors.push(format!("Article {}: {message}", article.id));
                result.last_error = Some(format!("FATAL: {message} - stopping batch"));
                true
            }
        };

        if let Some(progress) = on_progress {
            if let Err(e) = progress(i + 1, total) {
                warn!(stage = %stage.stage(), error = %e, "Progress callback failed");
            }
        }

        if stop {
            result.stopped_early = true;
            warn!(
                stage = %stage.stage(),
                processed = i + 1,
                total,
                reason = result.last_error.as_deref().unwrap_or_default(),
                "Batch stopped early"
            );
            break;
        }
    }

    Ok(result)
}

/// Fetch the stage's pending items and run them as one batch.
/// Progress starts with `(0, total)` once the items are known, even when
/// there are none.
pub async fn run_stage<S>(stage: &S, on_progress: Option<BatchProgress<'_>>) -> Result<BatchResult>
where
    S: BatchStage + ?Sized,
{
    let items = stage.fetch_items().await?;
    if let Some(progress) = on_progress {
        if let Err(e) = progress(0, items.len()) {
            warn!(stage = %stage.stage(), error = %e, "Progress callback failed");
        }
    }
    if items.is_empty() {
        info!(stage = %stage.stage(), "No pending articles");
        return Ok(BatchResult::default());
    }
    info!(stage = %stage.stage(), pending = items.len(), "Starting batch");
    let result = run_batch(stage, &items, on_progress).await?;
    info!(stage = %stage.stage(), %result, "Batch complete");
    Ok(result)
}
