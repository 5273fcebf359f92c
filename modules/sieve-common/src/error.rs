use thiserror::Error;

#[derive(Error, Debug)]
pub enum SieveError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No ingest source configured")]
    MissingIngestSource,

    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },
}
