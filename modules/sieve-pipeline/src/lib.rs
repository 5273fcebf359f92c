pub mod batch;
pub mod digest;
pub mod enrichment;
pub mod guard;
pub mod ingest;
pub mod job_status;
pub mod orchestrator;
pub mod runner;
pub mod scheduler;
pub mod scoring;
pub mod stages;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use batch::{BatchResult, OperationOutcome};
pub use digest::{DigestJob, DigestReport};
pub use enrichment::{EnrichError, Enricher, FailureKind, OllamaEnricher};
pub use guard::{RunGuard, RunLock, RunPermit, DIGEST_LOCK, PIPELINE_LOCK};
pub use ingest::{Ingestor, JsonlIngestor};
pub use job_status::{JobKind, JobState, JobStatus};
pub use orchestrator::{Pipeline, PipelineRunReport, PipelineStage, StageSlot};
pub use runner::{DigestRunner, PipelineRunner, RunOutcome, TriggerSource};
pub use scheduler::Scheduler;
