//! Pipeline orchestrator: runs every stage in order and builds the run report.
//!
//! Ingest, compress, summarize, embed and score are required: an error in any
//! of them ends the run. Entity extraction, topic classification and thread
//! detection are advisory: their errors are recorded and the run goes on.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use sieve_common::{ArticleStore, SieveError, ThreadStore, ThreadsConfig};
use sieve_graph::{ThreadDetectionStats, ThreadDetector};

use crate::batch::{run_stage, BatchResult, BatchStage};
use crate::enrichment::Enricher;
use crate::ingest::{CompressResult, IngestResult, Ingestor};
use crate::stages::{EmbedStage, EntitiesStage, ScoreStage, StageDeps, SummarizeStage, TopicsStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Ingest,
    Compress,
    Summarize,
    Embed,
    Score,
    Entities,
    Topics,
    Threads,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 8] = [
        PipelineStage::Ingest,
        PipelineStage::Compress,
        PipelineStage::Summarize,
        PipelineStage::Embed,
        PipelineStage::Score,
        PipelineStage::Entities,
        PipelineStage::Topics,
        PipelineStage::Threads,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PipelineStage::Ingest => "ingest",
            PipelineStage::Compress => "compress",
            PipelineStage::Summarize => "summarize",
            PipelineStage::Embed => "embed",
            PipelineStage::Score => "score",
            PipelineStage::Entities => "entities",
            PipelineStage::Topics => "topics",
            PipelineStage::Threads => "threads",
        }
    }

    /// Name used in run errors ("Embedding failed: ...").
    pub fn display_name(&self) -> &'static str {
        match self {
            PipelineStage::Ingest => "Ingest",
            PipelineStage::Compress => "Compression",
            PipelineStage::Summarize => "Summarization",
            PipelineStage::Embed => "Embedding",
            PipelineStage::Score => "Scoring",
            PipelineStage::Entities => "Entity extraction",
            PipelineStage::Topics => "Topic classification",
            PipelineStage::Threads => "Thread detection",
        }
    }

    /// An error in a fatal-tier stage ends the run.
    pub fn is_fatal_tier(&self) -> bool {
        matches!(
            self,
            PipelineStage::Ingest
                | PipelineStage::Compress
                | PipelineStage::Summarize
                | PipelineStage::Embed
                | PipelineStage::Score
        )
    }

    fn progress_verb(&self) -> &'static str {
        match self {
            PipelineStage::Summarize => "Summarizing",
            PipelineStage::Embed => "Embedding",
            PipelineStage::Score => "Scoring",
            PipelineStage::Entities => "Extracting entities",
            PipelineStage::Topics => "Classifying topics",
            PipelineStage::Ingest => "Ingesting",
            PipelineStage::Compress => "Compressing",
            PipelineStage::Threads => "Detecting threads",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of an advisory stage: its result, or the error it hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StageSlot<T> {
    Completed(T),
    Failed { error: String },
}

impl<T> StageSlot<T> {
    pub fn completed(&self) -> Option<&T> {
        match self {
            StageSlot::Completed(value) => Some(value),
            StageSlot::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            StageSlot::Completed(_) => None,
            StageSlot::Failed { error } => Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunReport {
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub ingest: Option<IngestResult>,
    pub compress: Option<CompressResult>,
    pub summarize: Option<BatchResult>,
    pub embed: Option<BatchResult>,
    pub score: Option<BatchResult>,
    pub entities: Option<StageSlot<BatchResult>>,
    pub topics: Option<StageSlot<BatchResult>>,
    pub threads: Option<StageSlot<ThreadDetectionStats>>,
    pub error: Option<String>,
}

impl PipelineRunReport {
    fn started() -> Self {
        Self {
            success: true,
            started_at: Utc::now(),
            finished_at: None,
            ingest: None,
            compress: None,
            summarize: None,
            embed: None,
            score: None,
            entities: None,
            topics: None,
            threads: None,
            error: None,
        }
    }

    fn fail(mut self, error: String) -> Self {
        self.success = false;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
        self
    }

    /// One-line summary of what the run did.
    pub fn summary_line(&self) -> String {
        fn succeeded(slot: Option<&StageSlot<BatchResult>>) -> usize {
            slot.and_then(StageSlot::completed).map_or(0, |r| r.succeeded)
        }
        let threads = self
            .threads
            .as_ref()
            .and_then(StageSlot::completed)
            .map_or(0, |s| s.threads_created + s.threads_updated);

        format!(
            "{} ingested, {} deduped, {} summarized, {} embedded, {} scored, {} entities, {} topics, {} threads",
            self.ingest.as_ref().map_or(0, |r| r.inserted),
            self.compress.as_ref().map_or(0, |r| r.removed_count),
            self.summarize.as_ref().map_or(0, |r| r.succeeded),
            self.embed.as_ref().map_or(0, |r| r.succeeded),
            self.score.as_ref().map_or(0, |r| r.succeeded),
            succeeded(self.entities.as_ref()),
            succeeded(self.topics.as_ref()),
            threads,
        )
    }
}

/// Progress listener: `(stage, current, total, message)`. Errors are logged
/// and ignored.
pub type PipelineProgress<'a> =
    &'a (dyn Fn(PipelineStage, usize, usize, &str) -> Result<()> + Send + Sync);

fn report_progress(
    on_progress: Option<PipelineProgress<'_>>,
    stage: PipelineStage,
    current: usize,
    total: usize,
    message: &str,
) {
    if let Some(progress) = on_progress {
        if let Err(e) = progress(stage, current, total, message) {
            warn!(%stage, error = %e, "Progress callback failed");
        }
    }
}

pub struct Pipeline {
    ingestor: Arc<dyn Ingestor>,
    ingest_path: Option<PathBuf>,
    summarize: SummarizeStage,
    resummarize: SummarizeStage,
    embed: EmbedStage,
    score: ScoreStage,
    entities: EntitiesStage,
    topics: TopicsStage,
    detector: ThreadDetector,
}

impl Pipeline {
    pub fn new(
        articles: Arc<dyn ArticleStore>,
        threads: Arc<dyn ThreadStore>,
        enricher: Arc<dyn Enricher>,
        ingestor: Arc<dyn Ingestor>,
        ingest_path: Option<PathBuf>,
        threads_config: ThreadsConfig,
    ) -> Self {
        let deps = StageDeps::new(articles, enricher);
        Self {
            ingestor,
            ingest_path,
            summarize: SummarizeStage::new(deps.clone(), threads.clone()),
            resummarize: SummarizeStage::backfill(deps.clone(), threads.clone()),
            embed: EmbedStage::new(deps.clone()),
            score: ScoreStage::new(deps.clone()),
            entities: EntitiesStage::new(deps.clone()),
            topics: TopicsStage::new(deps),
            detector: ThreadDetector::new(threads, threads_config),
        }
    }

    /// Run every stage once. Never returns an error: failures end up in the report.
    pub async fn run(&self, on_progress: Option<PipelineProgress<'_>>) -> PipelineRunReport {
        let timer = Instant::now();
        let mut report = PipelineRunReport::started();

        let Some(path) = self.ingest_path.as_deref() else {
            let message = SieveError::MissingIngestSource.to_string();
            error!("{message}");
            return report.fail(message);
        };

        // === Fatal tier ===

        info!("=== Ingest ===");
        report_progress(on_progress, PipelineStage::Ingest, 0, 1, "Ingesting articles from JSONL");
        match self.ingestor.ingest(path).await {
            Ok(result) => {
                let message = format!("Ingested {} new articles", result.inserted);
                report_progress(on_progress, PipelineStage::Ingest, 1, 1, &message);
                report.ingest = Some(result);
            }
            Err(e) => return abort(report, PipelineStage::Ingest, e),
        }

        info!("=== Compress ===");
        report_progress(on_progress, PipelineStage::Compress, 0, 1, "Removing duplicates from JSONL");
        match self.ingestor.compress(path).await {
            Ok(result) => {
                let message = format!("Removed {} duplicates", result.removed_count);
                report_progress(on_progress, PipelineStage::Compress, 1, 1, &message);
                report.compress = Some(result);
            }
            Err(e) => return abort(report, PipelineStage::Compress, e),
        }

        match run_enrichment(PipelineStage::Summarize, &self.summarize, on_progress).await {
            Ok(result) => report.summarize = Some(result),
            Err(e) => return abort(report, PipelineStage::Summarize, e),
        }
        match run_enrichment(PipelineStage::Embed, &self.embed, on_progress).await {
            Ok(result) => report.embed = Some(result),
            Err(e) => return abort(report, PipelineStage::Embed, e),
        }
        match run_enrichment(PipelineStage::Score, &self.score, on_progress).await {
            Ok(result) => report.score = Some(result),
            Err(e) => return abort(report, PipelineStage::Score, e),
        }

        // === Advisory tier ===

        report.entities = Some(advisory(
            PipelineStage::Entities,
            run_enrichment(PipelineStage::Entities, &self.entities, on_progress).await,
        ));
        report.topics = Some(advisory(
            PipelineStage::Topics,
            run_enrichment(PipelineStage::Topics, &self.topics, on_progress).await,
        ));

        info!("=== Thread Detection ===");
        report_progress(on_progress, PipelineStage::Threads, 0, 1, "Detecting story threads");
        let threads = self.detector.detect().await;
        if let Ok(stats) = &threads {
            info!("{stats}");
            let message = format!(
                "Threads: {} new, {} updated",
                stats.threads_created, stats.threads_updated
            );
            report_progress(on_progress, PipelineStage::Threads, 1, 1, &message);
        }
        report.threads = Some(advisory(PipelineStage::Threads, threads));

        report.finished_at = Some(Utc::now());
        info!(
            "Pipeline complete in {:.1}s: {}",
            timer.elapsed().as_secs_f64(),
            report.summary_line()
        );
        report
    }

    /// Re-summarize articles whose summaries predate related-coverage lookups.
    /// Standalone maintenance run, outside the staged pipeline.
    pub async fn resummarize(
        &self,
        on_progress: Option<PipelineProgress<'_>>,
    ) -> Result<BatchResult> {
        run_enrichment(PipelineStage::Summarize, &self.resummarize, on_progress).await
    }
}

/// Run one enrichment stage, forwarding per-item progress. The listener sees
/// `(stage, 0, total)` before the first item and a summary once the batch ends.
async fn run_enrichment<S>(
    stage: PipelineStage,
    batch: &S,
    on_progress: Option<PipelineProgress<'_>>,
) -> Result<BatchResult>
where
    S: BatchStage,
{
    info!("=== {} ===", stage.display_name());
    let pending = AtomicUsize::new(0);
    let forward = |current: usize, total: usize| -> Result<()> {
        pending.store(total, Ordering::Relaxed);
        if let Some(progress) = on_progress {
            let message = if current == 0 {
                format!("{} {total} articles", stage.progress_verb())
            } else {
                format!("{} {current}/{total}", stage.progress_verb())
            };
            progress(stage, current, total, &message)?;
        }
        Ok(())
    };
    let result = run_stage(batch, Some(&forward)).await?;
    if result.stopped_early {
        warn!(
            %stage,
            last_error = result.last_error.as_deref().unwrap_or_default(),
            "Stage stopped early, continuing"
        );
    }

    let total = pending.load(Ordering::Relaxed);
    let message = format!(
        "{}: {} succeeded, {} failed",
        stage.display_name(),
        result.succeeded,
        result.failed
    );
    report_progress(on_progress, stage, total, total, &message);
    Ok(result)
}

fn abort(report: PipelineRunReport, stage: PipelineStage, e: anyhow::Error) -> PipelineRunReport {
    let message = format!("{} failed: {e:#}", stage.display_name());
    error!(%stage, error = %e, "Required stage failed, aborting run");
    report.fail(message)
}

fn advisory<T>(stage: PipelineStage, result: Result<T>) -> StageSlot<T> {
    match result {
        Ok(value) => StageSlot::Completed(value),
        Err(e) => {
            warn!(%stage, error = %e, "{} failed, continuing", stage.display_name());
            StageSlot::Failed {
                error: format!("{e:#}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_five_stages_are_fatal_tier() {
        let fatal: Vec<_> = PipelineStage::ALL
            .iter()
            .filter(|s| s.is_fatal_tier())
            .map(|s| s.label())
            .collect();
        assert_eq!(fatal, vec!["ingest", "compress", "summarize", "embed", "score"]);
    }

    #[test]
    fn failed_slot_serializes_as_error_object() {
        let slot: StageSlot<BatchResult> = StageSlot::Failed {
            error: "timeout".into(),
        };
        assert_eq!(
            serde_json::to_value(&slot).unwrap(),
            serde_json::json!({"error": "timeout"})
        );
        let done = StageSlot::Completed(BatchResult::default());
        assert_eq!(serde_json::to_value(&done).unwrap()["succeeded"], 0);
    }

    #[test]
    fn summary_line_counts_what_ran() {
        let mut report = PipelineRunReport::started();
        report.ingest = Some(IngestResult {
            inserted: 4,
            ..Default::default()
        });
        report.summarize = Some(BatchResult {
            succeeded: 3,
            ..Default::default()
        });
        report.entities = Some(StageSlot::Failed {
            error: "boom".into(),
        });
        assert_eq!(
            report.summary_line(),
            "4 ingested, 0 deduped, 3 summarized, 0 embedded, 0 scored, 0 entities, 0 topics, 0 threads"
        );
    }
}
