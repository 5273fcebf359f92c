//! JSONL ingest source: one article object per line.

use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use sieve_common::{ArticleStore, NewArticle};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestResult {
    pub inserted: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompressResult {
    pub original_count: usize,
    pub unique_count: usize,
    pub removed_count: usize,
}

#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Insert every new article in the source. Existing URLs are skipped.
    async fn ingest(&self, path: &Path) -> Result<IngestResult>;

    /// Rewrite the source keeping one entry per URL.
    async fn compress(&self, path: &Path) -> Result<CompressResult>;
}

/// One line of the source file. Every field is optional so a partial entry
/// still parses and can be reported.
#[derive(Debug, Deserialize)]
struct RawEntry {
    url: Option<String>,
    title: Option<String>,
    source: Option<String>,
    content: Option<String>,
    pub_date: Option<String>,
    pulled_at: Option<String>,
}

/// Canonical spelling of known feed names. Unknown names pass through unchanged.
pub fn normalize_source(name: &str) -> String {
    let canonical = match name.trim().to_lowercase().as_str() {
        "techcrunch" | "tech crunch" => "TechCrunch",
        "tech dirt" | "techdirt" => "Tech Dirt",
        "eff" => "EFF",
        "404 media" => "404 Media",
        "ars technica" => "Ars Technica",
        "the verge" => "The Verge",
        "rest of world" => "Rest of World",
        "interconnects" => "Interconnects",
        "where's your ed at" => "Where's Your Ed At",
        _ => return name.to_string(),
    };
    canonical.to_string()
}

/// Parse the date formats feeds actually emit: RFC 2822, RFC 3339, and naive
/// ISO timestamps (taken as UTC).
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

impl RawEntry {
    fn into_new_article(self, url: String, now: DateTime<Utc>) -> NewArticle {
        let pulled_at = self.pulled_at.as_deref().and_then(parse_date);
        let published_at = self
            .pub_date
            .as_deref()
            .and_then(parse_date)
            .or(pulled_at)
            .unwrap_or(now);

        NewArticle {
            url,
            title: self.title.unwrap_or_default(),
            source: self
                .source
                .filter(|s| !s.trim().is_empty())
                .map(|s| normalize_source(&s)),
            content: self.content.unwrap_or_default(),
            published_at,
            pulled_at,
        }
    }
}

/// Reads articles from a JSONL file into an `ArticleStore`.
pub struct JsonlIngestor {
    store: Arc<dyn ArticleStore>,
}

impl JsonlIngestor {
    pub fn new(store: Arc<dyn ArticleStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Ingestor for JsonlIngestor {
    async fn ingest(&self, path: &Path) -> Result<IngestResult> {
        let mut result = IngestResult::default();

        let file = match tokio::fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "Ingest source not found, nothing to ingest");
                return Ok(result);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open {}", path.display()))
            }
        };

        let now = Utc::now();
        let mut lines = BufReader::new(file).lines();
        let mut line_number = 0usize;

        while let Some(line) = lines
            .next_line()
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?
        {
            line_number += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let entry: RawEntry = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(line = line_number, error = %e, "Skipping malformed JSONL line");
                    continue;
                }
            };

            let Some(url) = entry.url.clone().filter(|u| !u.trim().is_empty()) else {
                result.errors.push("Article missing URL field".to_string());
                continue;
            };

            if self.store.article_exists(&url).await? {
                result.skipped += 1;
                continue;
            }

            let article = entry.into_new_article(url, now);
            match self.store.insert_article(&article).await {
                Ok(Some(id)) => {
                    debug!(id, url = %article.url, "Inserted article");
                    result.inserted += 1;
                }
                Ok(None) => result.skipped += 1,
                Err(e) => result
                    .errors
                    .push(format!("Failed to insert article '{}': {e}", article.title)),
            }
        }

        info!(
            inserted = result.inserted,
            skipped = result.skipped,
            errors = result.errors.len(),
            "Ingest complete"
        );
        Ok(result)
    }

    async fn compress(&self, path: &Path) -> Result<CompressResult> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CompressResult::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        let (kept, result) = dedupe_lines(&text);
        if result.removed_count == 0 {
            debug!(path = %path.display(), "No duplicates to remove");
            return Ok(result);
        }

        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || write_atomically(&path, &kept))
            .await
            .context("Compress task panicked")??;

        info!(
            original = result.original_count,
            unique = result.unique_count,
            removed = result.removed_count,
            "Compressed ingest source"
        );
        Ok(result)
    }
}

#[derive(Deserialize)]
struct DedupeKey {
    url: Option<String>,
    pulled_at: Option<String>,
}

/// Keep one line per URL: the one with the greatest `pulled_at` (compared as
/// strings). Lines without a URL are all kept. Malformed lines are dropped.
/// Output keeps first-seen order.
fn dedupe_lines(text: &str) -> (Vec<String>, CompressResult) {
    let mut kept: Vec<(String, String)> = Vec::new();
    let mut by_url: HashMap<String, usize> = HashMap::new();
    let mut original_count = 0;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        original_count += 1;
        let key: DedupeKey = match serde_json::from_str(line) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Dropping malformed JSONL line");
                continue;
            }
        };
        let pulled_at = key.pulled_at.unwrap_or_default();

        let Some(url) = key.url.filter(|u| !u.is_empty()) else {
            kept.push((pulled_at, line.to_string()));
            continue;
        };

        match by_url.get(&url) {
            Some(&i) => {
                if pulled_at > kept[i].0 {
                    kept[i] = (pulled_at, line.to_string());
                }
            }
            None => {
                by_url.insert(url, kept.len());
                kept.push((pulled_at, line.to_string()));
            }
        }
    }

    let unique_count = kept.len();
    let lines = kept.into_iter().map(|(_, line)| line).collect();
    (
        lines,
        CompressResult {
            original_count,
            unique_count,
            removed_count: original_count - unique_count,
        },
    )
}

/// Write through a temp file in the same directory, then rename over `path`.
fn write_atomically(path: &Path, lines: &[String]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".compress_")
        .suffix(".jsonl")
        .tempfile_in(&dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    for line in lines {
        writeln!(tmp, "{line}")?;
    }
    tmp.flush()?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
