use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sieve_common::{AppConfig, FileConfig, ThreadStore};
use sieve_graph::ThreadDetector;
use sieve_pipeline::{
    DigestJob, DigestRunner, JobStatus, JsonlIngestor, OllamaEnricher, Pipeline, PipelineRunner,
    RunGuard, RunLock, RunOutcome, Scheduler, TriggerSource, PIPELINE_LOCK,
};
use sieve_store::PgStore;

#[derive(Parser)]
#[command(name = "sieve", about = "News enrichment pipeline and story thread detection")]
struct Cli {
    /// Path to config TOML file (overrides SIEVE_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline once and print the report as JSON
    Run,
    /// Run thread detection and list the most recent threads
    Threads,
    /// Generate today's digest
    Digest,
    /// Re-summarize articles summarized without related coverage
    Resummarize,
    /// Run the scheduler until Ctrl-C
    Schedule,
    /// Apply database migrations
    Migrate,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("sieve=info".parse()?);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(path) = cli.config {
        config.config_path = path;
    }
    let file_config = FileConfig::load_or_default(&config.config_path)?;

    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    store.migrate().await?;
    if matches!(cli.command, Command::Migrate) {
        info!("Migrations applied");
        return Ok(());
    }

    if matches!(cli.command, Command::Threads) {
        // Thread detection is pipeline stage 8, so it shares the pipeline lock.
        let guard = RunGuard::shared(RunLock::new(store.clone(), PIPELINE_LOCK));
        let Some(permit) = guard.acquire_shared().await? else {
            warn!("Pipeline already running, skipping thread detection");
            return Ok(());
        };
        let detector = ThreadDetector::new(store.clone(), file_config.threads.clone());
        let result = detector.detect().await;
        permit.release().await;
        info!("{}", result?);
        for thread in store.list_threads(10).await? {
            println!(
                "#{} {} ({} articles, updated {})",
                thread.id,
                thread.name,
                thread.member_article_ids.len(),
                thread.updated_at.format("%Y-%m-%d %H:%M")
            );
        }
        return Ok(());
    }

    let enricher = Arc::new(OllamaEnricher::from_config(
        &config.ollama_url,
        &file_config.models,
    ));
    let status = Arc::new(JobStatus::new());

    let pipeline = Pipeline::new(
        store.clone(),
        store.clone(),
        enricher.clone(),
        Arc::new(JsonlIngestor::new(store.clone())),
        file_config.ingest.path.clone(),
        file_config.threads.clone(),
    );
    if matches!(cli.command, Command::Resummarize) {
        let guard = RunGuard::shared(RunLock::new(store.clone(), PIPELINE_LOCK));
        let Some(permit) = guard.acquire_shared().await? else {
            warn!("Pipeline already running, skipping re-summarization");
            return Ok(());
        };
        let result = pipeline.resummarize(None).await;
        permit.release().await;
        let result = result?;
        info!(%result, "Re-summarization complete");
        return Ok(());
    }

    let pipeline_runner =
        Arc::new(PipelineRunner::new(pipeline, status.clone()).with_lock(store.clone()));
    let digest_runner = Arc::new(
        DigestRunner::new(
            DigestJob::new(store.clone(), store.clone(), enricher),
            status.clone(),
        )
        .with_lock(store.clone()),
    );

    match cli.command {
        Command::Run => {
            if let RunOutcome::Completed(report) =
                pipeline_runner.trigger(TriggerSource::Manual).await
            {
                println!("{}", serde_json::to_string_pretty(&report)?);
                if !report.success {
                    std::process::exit(1);
                }
            }
        }
        Command::Digest => {
            if let RunOutcome::Completed(result) =
                digest_runner.trigger(TriggerSource::Manual).await
            {
                let report = result?;
                info!(date = %report.date, articles = report.article_count, "Digest complete");
            }
        }
        Command::Schedule => {
            let mut scheduler =
                Scheduler::start(pipeline_runner, digest_runner, &file_config.schedule).await?;
            tokio::signal::ctrl_c().await?;
            warn!("Ctrl-C received, shutting down");
            scheduler.shutdown().await?;
        }
        Command::Migrate | Command::Threads | Command::Resummarize => {}
    }

    Ok(())
}
