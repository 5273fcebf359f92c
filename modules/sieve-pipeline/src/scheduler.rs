//! Cron scheduling for the pipeline and digest jobs.
//!
//! Expressions are standard 5-field cron (`min hour dom month dow`);
//! tokio-cron-scheduler wants a leading seconds field, so `0` is prepended.

use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;

use sieve_common::file_config::ScheduleConfig;
use sieve_common::SieveError;

use crate::runner::{DigestRunner, PipelineRunner, RunOutcome, TriggerSource};

const CRON_FIELDS: usize = 5;

/// Validate a 5-field cron expression and convert it to the 6-field form.
pub fn to_six_field(expr: &str) -> Result<String, SieveError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != CRON_FIELDS {
        return Err(SieveError::InvalidCron {
            expr: expr.to_string(),
            reason: format!("expected {CRON_FIELDS} fields, got {}", fields.len()),
        });
    }
    Ok(format!("0 {}", fields.join(" ")))
}

pub struct Scheduler {
    inner: JobScheduler,
    pipeline: Arc<PipelineRunner>,
    digest: Arc<DigestRunner>,
    pipeline_job: Option<Uuid>,
    digest_job: Option<Uuid>,
}

impl Scheduler {
    pub async fn new(pipeline: Arc<PipelineRunner>, digest: Arc<DigestRunner>) -> Result<Self> {
        Ok(Self {
            inner: JobScheduler::new().await?,
            pipeline,
            digest,
            pipeline_job: None,
            digest_job: None,
        })
    }

    /// Build a scheduler from config and start it.
    pub async fn start(
        pipeline: Arc<PipelineRunner>,
        digest: Arc<DigestRunner>,
        config: &ScheduleConfig,
    ) -> Result<Self> {
        let mut scheduler = Self::new(pipeline, digest).await?;
        scheduler.schedule_pipeline(&config.pipeline).await?;
        if config.digest_enabled {
            scheduler.schedule_digest(&config.digest).await?;
        }
        scheduler.inner.start().await?;
        info!(
            pipeline = %config.pipeline,
            digest = if config.digest_enabled { config.digest.as_str() } else { "disabled" },
            "Scheduler started"
        );
        Ok(scheduler)
    }

    pub fn pipeline_job(&self) -> Option<Uuid> {
        self.pipeline_job
    }

    pub fn digest_job(&self) -> Option<Uuid> {
        self.digest_job
    }

    /// Schedule the pipeline, replacing any existing pipeline job.
    pub async fn schedule_pipeline(&mut self, cron: &str) -> Result<()> {
        let schedule = to_six_field(cron)?;
        let runner = self.pipeline.clone();
        let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
            let runner = runner.clone();
            Box::pin(async move {
                if let RunOutcome::Completed(report) = runner.trigger(TriggerSource::Scheduled).await {
                    if let Some(e) = report.error {
                        error!(error = %e, "Scheduled pipeline run failed");
                    }
                }
            })
        })
        .map_err(|e| invalid_cron(cron, e))?;

        if let Some(old) = self.pipeline_job.take() {
            self.inner.remove(&old).await?;
        }
        self.pipeline_job = Some(self.inner.add(job).await?);
        info!(cron, "Pipeline job scheduled");
        Ok(())
    }

    /// Schedule the digest, replacing any existing digest job.
    pub async fn schedule_digest(&mut self, cron: &str) -> Result<()> {
        let schedule = to_six_field(cron)?;
        let runner = self.digest.clone();
        let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
            let runner = runner.clone();
            Box::pin(async move {
                // DigestRunner logs and records its own failures.
                let _ = runner.trigger(TriggerSource::Scheduled).await;
            })
        })
        .map_err(|e| invalid_cron(cron, e))?;

        if let Some(old) = self.digest_job.take() {
            self.inner.remove(&old).await?;
        }
        self.digest_job = Some(self.inner.add(job).await?);
        info!(cron, "Digest job scheduled");
        Ok(())
    }

    pub async fn remove_digest(&mut self) -> Result<()> {
        if let Some(id) = self.digest_job.take() {
            self.inner.remove(&id).await?;
            info!("Digest job removed");
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        info!("Scheduler stopped");
        Ok(())
    }
}

fn invalid_cron(expr: &str, e: impl std::fmt::Display) -> SieveError {
    SieveError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_fields_gain_a_seconds_field() {
        assert_eq!(to_six_field("0 * * * *").unwrap(), "0 0 * * * *");
        assert_eq!(to_six_field("  30 6  * * 1-5 ").unwrap(), "0 30 6 * * 1-5");
    }

    #[test]
    fn wrong_field_count_is_a_config_error() {
        for expr in ["", "* * * *", "0 0 * * * *"] {
            let err = to_six_field(expr).unwrap_err();
            assert!(matches!(err, SieveError::InvalidCron { .. }), "{expr}");
        }
        let err = to_six_field("* * * *").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid cron expression '* * * *': expected 5 fields, got 4"
        );
    }
}
