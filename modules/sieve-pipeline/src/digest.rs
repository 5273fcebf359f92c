//! Daily briefing over the last 24 hours of articles.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use regex::{Captures, Regex};
use serde::Serialize;
use tracing::info;

use ai_client::util::truncate_to_char_boundary;
use sieve_common::{Article, ArticleStore, DigestStore};

use crate::enrichment::Enricher;

const LOOKBACK_HOURS: i64 = 24;

static BRACKETED_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(https?://[^\]\s]+)\]").expect("valid regex"));
static BARE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s()\[\]<>]+").expect("valid regex"));
static DOUBLE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\[[^\]]+\]\([^)]+\))\]\([^)]+\)").expect("valid regex")
});

/// Label for a linked URL that matches none of the day's articles.
const UNKNOWN_LINK_LABEL: &str = "source";

pub const NO_ARTICLES_MESSAGE: &str =
    "No articles from the past 24 hours. The silence itself is notable.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestReport {
    pub date: NaiveDate,
    pub article_count: usize,
    pub content_length: usize,
}

pub struct DigestJob {
    articles: Arc<dyn ArticleStore>,
    digests: Arc<dyn DigestStore>,
    enricher: Arc<dyn Enricher>,
}

impl DigestJob {
    pub fn new(
        articles: Arc<dyn ArticleStore>,
        digests: Arc<dyn DigestStore>,
        enricher: Arc<dyn Enricher>,
    ) -> Self {
        Self {
            articles,
            digests,
            enricher,
        }
    }

    pub async fn run(&self) -> Result<DigestReport> {
        let now = Utc::now();
        let date = now.date_naive();
        let mut articles = self
            .articles
            .articles_since(now - Duration::hours(LOOKBACK_HOURS))
            .await?;

        if articles.is_empty() {
            info!(%date, "No recent articles, storing empty digest");
            self.digests.save_digest(date, NO_ARTICLES_MESSAGE, 0).await?;
            return Ok(DigestReport {
                date,
                article_count: 0,
                content_length: NO_ARTICLES_MESSAGE.len(),
            });
        }

        rank(&mut articles);
        let material = format_material(&articles);
        info!(articles = articles.len(), chars = material.len(), "Generating digest");

        let briefing = self.enricher.generate_digest(&material).await?;
        let briefing = inject_article_links(briefing.trim_end(), &articles);
        let content = format!("{briefing}{}", sources_section(&articles));

        self.digests
            .save_digest(date, &content, articles.len())
            .await?;
        info!(%date, articles = articles.len(), "Digest saved");

        Ok(DigestReport {
            date,
            article_count: articles.len(),
            content_length: content.len(),
        })
    }
}

/// Highest composite score first, then newest. Unscored articles sort last.
fn rank(articles: &mut [Article]) {
    articles.sort_by(|a, b| {
        let score = |x: &Article| x.scores.as_ref().map(|s| s.composite);
        score(b)
            .cmp(&score(a))
            .then_with(|| b.published_at.cmp(&a.published_at))
    });
}

/// Per-article excerpt budget; shrinks as the day gets busier.
fn excerpt_limit(article_count: usize) -> usize {
    match article_count {
        0..=30 => 2000,
        31..=50 => 1500,
        _ => 1000,
    }
}

fn format_material(articles: &[Article]) -> String {
    let limit = excerpt_limit(articles.len());
    let mut out = format!(
        "{} articles from the past {LOOKBACK_HOURS} hours:\n\n",
        articles.len()
    );

    for article in articles {
        let content = article.content.trim();
        let excerpt = truncate_to_char_boundary(content, limit);
        let ellipsis = if excerpt.len() < content.len() { "..." } else { "" };
        let keywords = if article.keywords.is_empty() {
            "none".to_string()
        } else {
            article.keywords.join(", ")
        };

        let _ = write!(
            out,
            "### \"{}\"\nURL: {}\nSource: {}\nKeywords: {}\nSummary: {}\n\n**Article excerpt:**\n{}{}\n\n---\n",
            article.title,
            article.url,
            article.source.as_deref().unwrap_or("Unknown"),
            keywords,
            article.summary.as_deref().unwrap_or("No summary available"),
            excerpt,
            ellipsis,
        );
    }
    out
}

/// Turn the URLs and titles the model mentions into markdown links:
/// `[url]` and bare URLs become `[Title](url)` (or `[source](url)` for URLs
/// outside the day's articles), and a bare `[Title]` gains its URL.
fn inject_article_links(content: &str, articles: &[Article]) -> String {
    let titles: HashMap<&str, &str> = articles
        .iter()
        .filter(|a| !a.url.is_empty() && !a.title.is_empty())
        .map(|a| (a.url.as_str(), a.title.as_str()))
        .collect();
    let label = |url: &str| titles.get(url).copied().unwrap_or(UNKNOWN_LINK_LABEL);

    let content = BRACKETED_URL.replace_all(content, |caps: &Captures| {
        let whole = &caps[0];
        let end = caps.get(0).map_or(0, |m| m.end());
        if content[end..].starts_with('(') {
            return whole.to_string();
        }
        let url = &caps[1];
        format!("[{}]({url})", label(url))
    });

    let content = BARE_URL.replace_all(&content, |caps: &Captures| {
        let whole = &caps[0];
        let start = caps.get(0).map_or(0, |m| m.start());
        // Already a link target or link text.
        if matches!(content[..start].chars().last(), Some('(' | '[')) {
            return whole.to_string();
        }
        let url = whole.trim_end_matches(['.', ',', ';', ':', '!', '?']);
        let trailing = &whole[url.len()..];
        format!("[{}]({url}){trailing}", label(url))
    });

    let mut content = content.into_owned();
    let mut by_length: Vec<(&str, &str)> =
        titles.iter().map(|(url, title)| (*title, *url)).collect();
    by_length.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
    for (title, url) in by_length {
        content = link_bare_title(&content, title, url);
    }

    DOUBLE_LINK.replace_all(&content, "$1").into_owned()
}

/// Append `(url)` to every `[title]` not already followed by a link target.
fn link_bare_title(content: &str, title: &str, url: &str) -> String {
    let needle = format!("[{title}]");
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(i) = rest.find(&needle) {
        let (head, after) = rest.split_at(i + needle.len());
        out.push_str(head);
        if !after.starts_with('(') {
            let _ = write!(out, "({url})");
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

/// Markdown link list grouped by source, sources in alphabetical order.
fn sources_section(articles: &[Article]) -> String {
    let mut by_source: BTreeMap<&str, Vec<&Article>> = BTreeMap::new();
    for article in articles {
        by_source
            .entry(article.source.as_deref().unwrap_or("Unknown"))
            .or_default()
            .push(article);
    }

    let mut out = String::from("\n\n---\n## Sources\n");
    for (source, list) in by_source {
        let _ = write!(out, "\n**{source}**\n");
        for article in list {
            let _ = writeln!(out, "- [{}]({})", article.title, article.url);
        }
    }
    out
}
