use std::path::PathBuf;
use std::sync::Arc;

use sieve_common::{SieveError, ThreadsConfig};
use sieve_pipeline::testing::{MockEnricher, MockIngestor};
use sieve_pipeline::{
    DigestJob, DigestRunner, JobStatus, Pipeline, PipelineRunner, Scheduler,
};
use sieve_store::MemoryStore;

async fn scheduler() -> Scheduler {
    let store = Arc::new(MemoryStore::new());
    let enricher = Arc::new(MockEnricher::new());
    let status = Arc::new(JobStatus::new());
    let pipeline = Pipeline::new(
        store.clone(),
        store.clone(),
        enricher.clone(),
        Arc::new(MockIngestor::new()),
        Some(PathBuf::from("/tmp/articles.jsonl")),
        ThreadsConfig::default(),
    );
    Scheduler::new(
        Arc::new(PipelineRunner::new(pipeline, status.clone())),
        Arc::new(DigestRunner::new(
            DigestJob::new(store.clone(), store, enricher),
            status,
        )),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn rejects_six_field_expressions() {
    let mut scheduler = scheduler().await;
    let err = scheduler
        .schedule_pipeline("0 0 * * * *")
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SieveError>(),
        Some(SieveError::InvalidCron { .. })
    ));
    assert!(scheduler.pipeline_job().is_none());
}

#[tokio::test]
async fn rejects_out_of_range_fields() {
    let mut scheduler = scheduler().await;
    let err = scheduler.schedule_digest("61 6 * * *").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SieveError>(),
        Some(SieveError::InvalidCron { .. })
    ));
}

#[tokio::test]
async fn rescheduling_replaces_the_job() {
    let mut scheduler = scheduler().await;
    scheduler.schedule_pipeline("0 * * * *").await.unwrap();
    let first = scheduler.pipeline_job().unwrap();

    scheduler.schedule_pipeline("*/15 * * * *").await.unwrap();
    let second = scheduler.pipeline_job().unwrap();

    assert_ne!(first, second);
}

#[tokio::test]
async fn digest_job_can_be_removed() {
    let mut scheduler = scheduler().await;
    scheduler.schedule_digest("0 6 * * *").await.unwrap();
    assert!(scheduler.digest_job().is_some());

    scheduler.remove_digest().await.unwrap();
    assert!(scheduler.digest_job().is_none());
}
