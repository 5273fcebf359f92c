use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::error::SieveError;

/// TOML-backed configuration loaded from disk.
/// Secrets (DB URL) stay as env vars. Every section has defaults, so an
/// absent file or an empty one yields a working configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub ingest: IngestConfig,
    pub models: ModelsConfig,
    pub schedule: ScheduleConfig,
    pub threads: ThreadsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// JSONL file the ingest stage reads from. The pipeline refuses to run without it.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelsConfig {
    pub chat: String,
    pub embed: String,
    pub num_ctx: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub embed_timeout_secs: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            chat: "llama3.2".to_string(),
            embed: "nomic-embed-text".to_string(),
            num_ctx: 4096,
            temperature: 0.3,
            request_timeout_secs: 120,
            embed_timeout_secs: 60,
        }
    }
}

/// Standard 5-field cron expressions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    pub pipeline: String,
    pub digest: String,
    pub digest_enabled: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            pipeline: "0 * * * *".to_string(),
            digest: "0 6 * * *".to_string(),
            digest_enabled: false,
        }
    }
}

/// Thread detection tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThreadsConfig {
    /// Minimum component size to form (or be matched against) a thread.
    pub cluster_threshold: usize,
    /// Nearest embedding neighbours considered per article.
    pub embedding_top_k: usize,
    /// Lookback window for the working set, in days.
    pub lookback_days: i64,
    /// Shared entities needed to link two articles.
    pub entity_overlap_min: usize,
    /// A component extends a thread only when its overlap ratio is strictly above this.
    pub thread_overlap_ratio: f64,
    /// Entities stored as a thread's primary entities.
    pub primary_entity_count: usize,
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            cluster_threshold: 5,
            embedding_top_k: 5,
            lookback_days: 30,
            entity_overlap_min: 2,
            thread_overlap_ratio: 0.5,
            primary_entity_count: 5,
        }
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

impl FileConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), SieveError> {
        let t = &self.threads;
        if t.cluster_threshold == 0 {
            return Err(SieveError::Config("threads.cluster_threshold must be at least 1".into()));
        }
        if t.lookback_days <= 0 {
            return Err(SieveError::Config("threads.lookback_days must be positive".into()));
        }
        if !(0.0..=1.0).contains(&t.thread_overlap_ratio) {
            return Err(SieveError::Config(
                "threads.thread_overlap_ratio must be between 0 and 1".into(),
            ));
        }
        if self.models.chat.trim().is_empty() || self.models.embed.trim().is_empty() {
            return Err(SieveError::Config("models.chat and models.embed must be set".into()));
        }
        Ok(())
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        load_config(path)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.ingest.path.is_none());
        assert_eq!(config.schedule.pipeline, "0 * * * *");
        assert_eq!(config.threads.cluster_threshold, 5);
        assert_eq!(config.threads.thread_overlap_ratio, 0.5);
        assert_eq!(config.models.embed, "nomic-embed-text");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: FileConfig = toml::from_str(
            r#"
            [ingest]
            path = "/data/articles.jsonl"

            [threads]
            lookback_days = 14
            "#,
        )
        .unwrap();
        assert_eq!(
            config.ingest.path.as_deref(),
            Some(Path::new("/data/articles.jsonl"))
        );
        assert_eq!(config.threads.lookback_days, 14);
        assert_eq!(config.threads.embedding_top_k, 5);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<FileConfig, _> = toml::from_str("[threads]\nbogus = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn defaults_are_valid() {
        assert!(FileConfig::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_tunables_are_rejected() {
        let config: FileConfig = toml::from_str("[threads]\nthread_overlap_ratio = 1.5\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SieveError::Config(_)));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[threads]\nlookback_days = 0").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.schedule.digest, "0 6 * * *");
    }

    #[test]
    fn loads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[schedule]\ndigest_enabled = true").unwrap();
        let config = load_config(file.path()).unwrap();
        assert!(config.schedule.digest_enabled);
    }
}
