//! Snapshot of the most recent job, for status reporting.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Pipeline,
    Digest,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Pipeline => f.write_str("pipeline"),
            JobKind::Digest => f.write_str("digest"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobState {
    pub running: bool,
    pub kind: Option<JobKind>,
    pub stage: Option<String>,
    pub current: usize,
    pub total: usize,
    pub message: Option<String>,
    pub error: Option<String>,
    pub report: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct JobStatus {
    state: Mutex<JobState>,
}

impl JobStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a new job of `kind`.
    pub fn begin(&self, kind: JobKind) {
        *self.state.lock().unwrap() = JobState {
            running: true,
            kind: Some(kind),
            started_at: Some(Utc::now()),
            ..Default::default()
        };
    }

    pub fn progress(&self, stage: &str, current: usize, total: usize, message: &str) {
        let mut state = self.state.lock().unwrap();
        state.stage = Some(stage.to_string());
        state.current = current;
        state.total = total;
        state.message = Some(message.to_string());
    }

    pub fn complete<R: Serialize>(&self, report: &R) {
        let report = serde_json::to_value(report)
            .map_err(|e| warn!(error = %e, "Failed to serialize job report"))
            .ok();
        let mut state = self.state.lock().unwrap();
        state.running = false;
        state.report = report;
        state.finished_at = Some(Utc::now());
    }

    pub fn fail(&self, error: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        state.error = Some(error.into());
        state.finished_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> JobState {
        self.state.lock().unwrap().clone()
    }
}
