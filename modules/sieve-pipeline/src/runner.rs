//! Guarded entry points shared by the scheduler and manual triggers.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use sieve_common::RunLockStore;

use crate::digest::{DigestJob, DigestReport};
use crate::guard::{RunGuard, RunLock, RunPermit, DIGEST_LOCK, PIPELINE_LOCK};
use crate::job_status::{JobKind, JobStatus};
use crate::orchestrator::{Pipeline, PipelineRunReport, PipelineStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Manual,
    Scheduled,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Manual => f.write_str("manual"),
            TriggerSource::Scheduled => f.write_str("scheduled"),
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome<R> {
    /// Another run held the guard.
    Skipped,
    Completed(R),
}

impl<R> RunOutcome<R> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped)
    }

    pub fn into_completed(self) -> Option<R> {
        match self {
            RunOutcome::Skipped => None,
            RunOutcome::Completed(report) => Some(report),
        }
    }
}

/// Claim `guard`, logging why when the run has to be skipped.
async fn claim<'a>(guard: &'a RunGuard, job: &str, source: TriggerSource) -> Option<RunPermit<'a>> {
    match guard.acquire_shared().await {
        Ok(Some(permit)) => Some(permit),
        Ok(None) => {
            warn!("{job} already running, skipping {source} execution");
            None
        }
        Err(e) => {
            error!(error = %e, "Could not check {job} lock, skipping {source} execution");
            None
        }
    }
}

pub struct PipelineRunner {
    pipeline: Pipeline,
    guard: RunGuard,
    status: Arc<JobStatus>,
}

impl PipelineRunner {
    pub fn new(pipeline: Pipeline, status: Arc<JobStatus>) -> Self {
        Self {
            pipeline,
            guard: RunGuard::new(),
            status,
        }
    }

    /// Also hold the shared pipeline lock, excluding runs in other processes.
    pub fn with_lock(mut self, locks: Arc<dyn RunLockStore>) -> Self {
        self.guard = RunGuard::shared(RunLock::new(locks, PIPELINE_LOCK));
        self
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    pub async fn trigger(&self, source: TriggerSource) -> RunOutcome<PipelineRunReport> {
        let Some(permit) = claim(&self.guard, "Pipeline", source).await else {
            return RunOutcome::Skipped;
        };

        info!(%source, "Starting pipeline run");
        self.status.begin(JobKind::Pipeline);
        let status = &self.status;
        let progress = |stage: PipelineStage, current: usize, total: usize, message: &str| -> Result<()> {
            status.progress(stage.label(), current, total, message);
            Ok(())
        };

        let report = self.pipeline.run(Some(&progress)).await;
        permit.release().await;
        match &report.error {
            None => self.status.complete(&report),
            Some(e) => self.status.fail(e.clone()),
        }
        RunOutcome::Completed(report)
    }
}

pub struct DigestRunner {
    job: DigestJob,
    guard: RunGuard,
    status: Arc<JobStatus>,
}

impl DigestRunner {
    pub fn new(job: DigestJob, status: Arc<JobStatus>) -> Self {
        Self {
            job,
            guard: RunGuard::new(),
            status,
        }
    }

    pub fn with_lock(mut self, locks: Arc<dyn RunLockStore>) -> Self {
        self.guard = RunGuard::shared(RunLock::new(locks, DIGEST_LOCK));
        self
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    pub async fn trigger(&self, source: TriggerSource) -> RunOutcome<Result<DigestReport>> {
        let Some(permit) = claim(&self.guard, "Digest", source).await else {
            return RunOutcome::Skipped;
        };

        info!(%source, "Starting digest generation");
        self.status.begin(JobKind::Digest);
        let result = self.job.run().await;
        permit.release().await;
        match &result {
            Ok(report) => self.status.complete(report),
            Err(e) => {
                error!(error = %e, "Digest generation failed");
                self.status.fail(format!("Digest failed: {e:#}"));
            }
        }
        RunOutcome::Completed(result)
    }
}
