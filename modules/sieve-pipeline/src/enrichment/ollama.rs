use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use ai_client::util::truncate_to_char_boundary;
use ai_client::Ollama;
use sieve_common::file_config::ModelsConfig;
use sieve_common::{Article, Embedding, EntitySet, Summary, DIMENSION_KEYS};

use super::parse::{parse_entities, parse_scores, parse_summary, parse_topics, TOPIC_TAXONOMY};
use super::{EnrichError, Enricher};
use crate::scoring::DimensionScores;

/// Article content beyond this many bytes is cut before prompting.
const MAX_CONTENT_LENGTH: usize = 6000;

/// Briefings are long; give the model ten minutes.
const DIGEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Room left in the context window for the briefing itself.
const DIGEST_RESPONSE_TOKENS: usize = 4000;

const DIGEST_MIN_CTX: u32 = 32768;

const SUMMARY_SYSTEM_PROMPT: &str = "Analyze the news article and respond in exactly this format:

SUMMARY:
<one paragraph of 5-8 sentences covering the key facts, context and implications>

KEYWORDS:
<3-5 keywords or short phrases, comma separated>";

const ENTITY_SYSTEM_PROMPT: &str = "Extract the named entities from the news article.
Return ONLY a JSON object with these keys, each a list of names as written in the article:
{\"companies\": [], \"people\": [], \"products\": [], \"legislation\": [], \"other\": []}";

/// At most this many related articles go into a summary prompt.
const MAX_CONTEXT_ARTICLES: usize = 5;

const CONTEXT_INSTRUCTION: &str = "If this article represents a development in an ongoing story, \
note how it relates to prior coverage. Note contradictions or new developments compared to \
earlier reporting.";

const DIGEST_PROMPT: &str = "Write today's briefing based on the articles provided.";

/// `Enricher` backed by a local Ollama server.
pub struct OllamaEnricher {
    client: Ollama,
    temperature: f32,
}

impl OllamaEnricher {
    pub fn new(client: Ollama, temperature: f32) -> Self {
        Self {
            client,
            temperature,
        }
    }

    pub fn from_config(base_url: &str, models: &ModelsConfig) -> Self {
        let client = Ollama::new(base_url)
            .with_chat_model(&models.chat)
            .with_embed_model(&models.embed)
            .with_options(models.num_ctx, models.temperature)
            .with_timeouts(
                Duration::from_secs(models.request_timeout_secs),
                Duration::from_secs(models.embed_timeout_secs),
            );
        Self::new(client, models.temperature)
    }
}

fn content_excerpt(content: &str) -> String {
    let cut = truncate_to_char_boundary(content, MAX_CONTENT_LENGTH);
    if cut.len() < content.len() {
        format!("{cut}...")
    } else {
        cut.to_string()
    }
}

fn article_prompt(article: &Article) -> String {
    let mut prompt = format!("Title: {}\n", article.title);
    if let Some(summary) = &article.summary {
        prompt.push_str(&format!("Summary: {summary}\n"));
    }
    if !article.keywords.is_empty() {
        prompt.push_str(&format!("Keywords: {}\n", article.keywords.join(", ")));
    }
    prompt.push_str(&format!("\nContent:\n{}", content_excerpt(&article.content)));
    prompt
}

/// Related coverage block for the summary prompt, or `None` without context.
fn context_block(context: &[Article]) -> Option<String> {
    if context.is_empty() {
        return None;
    }
    let mut block = String::from("Related coverage from the past 30 days:\n");
    for related in context.iter().take(MAX_CONTEXT_ARTICLES) {
        block.push_str(&format!(
            "- [{}] [{}]: \"{}\"\n",
            related.published_at.format("%Y-%m-%d"),
            related.source.as_deref().unwrap_or("Unknown"),
            related.title
        ));
        if let Some(summary) = &related.summary {
            block.push_str(&format!("  Summary: {summary}\n"));
        }
    }
    block.push('\n');
    block.push_str(CONTEXT_INSTRUCTION);
    Some(block)
}

fn summary_prompt(article: &Article, context: &[Article]) -> String {
    let content = content_excerpt(&article.content);
    match context_block(context) {
        Some(block) => format!("Title: {}\n\n{block}\n\nContent:\n{content}", article.title),
        None => format!("Title: {}\n\nContent:\n{content}", article.title),
    }
}

fn score_system_prompt() -> String {
    let keys = DIMENSION_KEYS
        .iter()
        .map(|k| format!("  \"{k}\": <0-3>"))
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        "Score the news article on each relevance dimension from 0 (absent) to 3 (central).\n\
         Return ONLY a JSON object:\n{{\n{keys},\n  \"rationale\": \"<one or two sentences>\"\n}}"
    )
}

fn topic_system_prompt() -> String {
    format!(
        "Classify the news article into 1-3 topics from this fixed taxonomy:\n{}\n\n\
         Return ONLY a JSON object: {{\"topics\": [\"topic1\", \"topic2\"]}}",
        TOPIC_TAXONOMY.join(", ")
    )
}

/// Context window large enough for the digest prompt plus the response,
/// rounded up to a multiple of 4096 (about four characters per token).
pub(crate) fn digest_num_ctx(prompt_chars: usize) -> u32 {
    let needed = prompt_chars / 4 + DIGEST_RESPONSE_TOKENS;
    let rounded = (needed / 4096 + 1) * 4096;
    u32::try_from(rounded).unwrap_or(u32::MAX).max(DIGEST_MIN_CTX)
}

#[async_trait]
impl Enricher for OllamaEnricher {
    async fn summarize(
        &self,
        article: &Article,
        context: &[Article],
    ) -> Result<Summary, EnrichError> {
        let prompt = summary_prompt(article, context);
        let response = self.client.generate(SUMMARY_SYSTEM_PROMPT, &prompt).await?;
        parse_summary(&response)
    }

    async fn embed(&self, article: &Article) -> Result<Embedding, EnrichError> {
        let text = match &article.summary {
            Some(summary) => format!("{}\n\n{summary}", article.title),
            None => article.title.clone(),
        };
        self.embed_text(&text).await
    }

    async fn embed_text(&self, text: &str) -> Result<Embedding, EnrichError> {
        let vector = self.client.embed(text).await?;
        Ok(Embedding(vector))
    }

    async fn score(&self, article: &Article) -> Result<DimensionScores, EnrichError> {
        let response = self
            .client
            .generate(&score_system_prompt(), &article_prompt(article))
            .await?;
        parse_scores(&response)
    }

    async fn extract_entities(&self, article: &Article) -> Result<EntitySet, EnrichError> {
        let response = self
            .client
            .generate(ENTITY_SYSTEM_PROMPT, &article_prompt(article))
            .await?;
        parse_entities(&response)
    }

    async fn classify_topics(&self, article: &Article) -> Result<Vec<String>, EnrichError> {
        let response = self
            .client
            .generate(&topic_system_prompt(), &article_prompt(article))
            .await?;
        parse_topics(&response)
    }

    async fn generate_digest(&self, material: &str) -> Result<String, EnrichError> {
        let num_ctx = digest_num_ctx(material.len());
        debug!(chars = material.len(), num_ctx, "Generating digest");
        let client = self
            .client
            .clone()
            .with_options(num_ctx, self.temperature)
            .with_timeouts(DIGEST_TIMEOUT, DIGEST_TIMEOUT);
        Ok(client.generate(material, DIGEST_PROMPT).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn long_content_is_cut_with_ellipsis() {
        let content = "x".repeat(MAX_CONTENT_LENGTH + 10);
        let excerpt = content_excerpt(&content);
        assert_eq!(excerpt.len(), MAX_CONTENT_LENGTH + 3);
        assert!(excerpt.ends_with("..."));
        assert_eq!(content_excerpt("short"), "short");
    }

    #[test]
    fn article_prompt_includes_summary_and_keywords() {
        let article = Article::builder()
            .id(1)
            .url("https://example.com/a")
            .title("Chip export rules")
            .content("Body")
            .published_at(Utc::now())
            .summary("New rules.")
            .keywords(vec!["chips".into(), "export".into()])
            .build();
        let prompt = article_prompt(&article);
        assert!(prompt.starts_with("Title: Chip export rules\n"));
        assert!(prompt.contains("Summary: New rules."));
        assert!(prompt.contains("Keywords: chips, export"));
        assert!(prompt.ends_with("Content:\nBody"));
    }

    #[test]
    fn related_coverage_goes_between_title_and_content() {
        let article = Article::builder()
            .id(2)
            .url("https://example.com/b")
            .title("Chip rules tightened")
            .content("Body")
            .published_at(Utc::now())
            .build();
        let related = Article::builder()
            .id(1)
            .url("https://example.com/a")
            .title("Chip export rules")
            .source("Reuters")
            .published_at("2025-03-01T12:00:00Z".parse().unwrap())
            .summary("New rules.")
            .build();

        let prompt = summary_prompt(&article, &[related]);
        assert!(prompt.starts_with(
            "Title: Chip rules tightened\n\nRelated coverage from the past 30 days:\n\
             - [2025-03-01] [Reuters]: \"Chip export rules\"\n  Summary: New rules.\n"
        ));
        assert!(prompt.contains(CONTEXT_INSTRUCTION));
        assert!(prompt.ends_with("Content:\nBody"));

        assert_eq!(summary_prompt(&article, &[]), "Title: Chip rules tightened\n\nContent:\nBody");
    }

    #[test]
    fn context_block_is_capped() {
        let related: Vec<Article> = (0..8)
            .map(|i| {
                Article::builder()
                    .id(i)
                    .url(format!("https://example.com/{i}"))
                    .title(format!("Story {i}"))
                    .published_at(Utc::now())
                    .build()
            })
            .collect();
        let block = context_block(&related).unwrap();
        assert_eq!(block.matches("[Unknown]").count(), MAX_CONTEXT_ARTICLES);
        assert!(context_block(&[]).is_none());
    }

    #[test]
    fn score_prompt_lists_every_dimension() {
        let prompt = score_system_prompt();
        for key in DIMENSION_KEYS {
            assert!(prompt.contains(key));
        }
    }

    #[test]
    fn digest_context_has_a_floor_and_grows() {
        assert_eq!(digest_num_ctx(0), DIGEST_MIN_CTX);
        assert_eq!(digest_num_ctx(200_000), 57344);
        assert_eq!(digest_num_ctx(200_000) % 4096, 0);
    }
}
