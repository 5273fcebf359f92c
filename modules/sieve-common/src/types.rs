use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

pub type ArticleId = i64;
pub type ThreadId = i64;

/// Number of relevance dimensions every article is scored on.
pub const DIMENSION_COUNT: usize = 7;

/// Column/key names of the seven relevance dimensions, in score order.
pub const DIMENSION_KEYS: [&str; DIMENSION_COUNT] = [
    "d1_attention_economy",
    "d2_data_sovereignty",
    "d3_power_consolidation",
    "d4_coercion_cooperation",
    "d5_fear_trust",
    "d6_democratization",
    "d7_systemic_design",
];

// --- Stages ---

/// The five per-article enrichment stages. Each owns exactly one processing
/// timestamp on the article and never writes any other stage's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStage {
    Summarize,
    Embed,
    Score,
    ExtractEntities,
    ClassifyTopics,
}

impl EnrichmentStage {
    pub const ALL: [EnrichmentStage; 5] = [
        EnrichmentStage::Summarize,
        EnrichmentStage::Embed,
        EnrichmentStage::Score,
        EnrichmentStage::ExtractEntities,
        EnrichmentStage::ClassifyTopics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentStage::Summarize => "summarize",
            EnrichmentStage::Embed => "embed",
            EnrichmentStage::Score => "score",
            EnrichmentStage::ExtractEntities => "entities",
            EnrichmentStage::ClassifyTopics => "topics",
        }
    }
}

impl fmt::Display for EnrichmentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Enrichment payloads ---

/// Named entities extracted from an article, grouped by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitySet {
    pub companies: Vec<String>,
    pub people: Vec<String>,
    pub products: Vec<String>,
    pub legislation: Vec<String>,
    pub other: Vec<String>,
}

impl EntitySet {
    pub const CATEGORIES: [&'static str; 5] =
        ["companies", "people", "products", "legislation", "other"];

    /// Maximum entities kept per category.
    pub const MAX_PER_CATEGORY: usize = 10;

    pub fn category_mut(&mut self, name: &str) -> Option<&mut Vec<String>> {
        match name {
            "companies" => Some(&mut self.companies),
            "people" => Some(&mut self.people),
            "products" => Some(&mut self.products),
            "legislation" => Some(&mut self.legislation),
            "other" => Some(&mut self.other),
            _ => None,
        }
    }

    /// All entity names across categories, in category order then list order.
    /// Blank names are skipped and the rest are trimmed.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [
            &self.companies,
            &self.people,
            &self.products,
            &self.legislation,
            &self.other,
        ]
        .into_iter()
        .flatten()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Distinct lowercased entity keys, first-seen order. Category
    /// distinctions are dropped: "Apple" as a company and as a product is one key.
    pub fn normalized_keys(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.iter()
            .map(|s| s.to_lowercase())
            .filter(|k| seen.insert(k.clone()))
            .collect()
    }
}

/// Fixed-length embedding vector produced by the embed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    pub fn dims(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Euclidean distance. Vectors of different length compare over the shorter prefix.
    pub fn l2_distance(&self, other: &Embedding) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(v: Vec<f32>) -> Self {
        Self(v)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub summary: String,
    pub keywords: Vec<String>,
    /// Related articles that were in the prompt. Empty when none were found.
    #[serde(default)]
    pub context_article_ids: Vec<ArticleId>,
}

/// Seven 0–3 dimension scores plus the values derived from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevanceScores {
    pub dimensions: [u8; DIMENSION_COUNT],
    /// Sum of all dimensions, 0–21.
    pub composite: u8,
    /// Priority tier, 1 (highest) to 5.
    pub tier: u8,
    /// True when at least five dimensions scored 2 or higher.
    pub convergence: bool,
    pub rationale: Option<String>,
}

/// Payload written back by one enrichment stage for one article.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    Summary(Summary),
    Embedding(Embedding),
    Scores(RelevanceScores),
    Entities(EntitySet),
    Topics(Vec<String>),
}

impl StageResult {
    pub fn stage(&self) -> EnrichmentStage {
        match self {
            StageResult::Summary(_) => EnrichmentStage::Summarize,
            StageResult::Embedding(_) => EnrichmentStage::Embed,
            StageResult::Scores(_) => EnrichmentStage::Score,
            StageResult::Entities(_) => EnrichmentStage::ExtractEntities,
            StageResult::Topics(_) => EnrichmentStage::ClassifyTopics,
        }
    }
}

// --- Articles ---

/// When each enrichment stage completed for an article (None = not yet).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimestamps {
    pub summarized_at: Option<DateTime<Utc>>,
    pub embedded_at: Option<DateTime<Utc>>,
    pub scored_at: Option<DateTime<Utc>>,
    pub entities_extracted_at: Option<DateTime<Utc>>,
    pub topics_classified_at: Option<DateTime<Utc>>,
}

impl ProcessingTimestamps {
    pub fn completed(&self, stage: EnrichmentStage) -> Option<DateTime<Utc>> {
        match stage {
            EnrichmentStage::Summarize => self.summarized_at,
            EnrichmentStage::Embed => self.embedded_at,
            EnrichmentStage::Score => self.scored_at,
            EnrichmentStage::ExtractEntities => self.entities_extracted_at,
            EnrichmentStage::ClassifyTopics => self.topics_classified_at,
        }
    }

    pub fn mark(&mut self, stage: EnrichmentStage, at: DateTime<Utc>) {
        let slot = match stage {
            EnrichmentStage::Summarize => &mut self.summarized_at,
            EnrichmentStage::Embed => &mut self.embedded_at,
            EnrichmentStage::Score => &mut self.scored_at,
            EnrichmentStage::ExtractEntities => &mut self.entities_extracted_at,
            EnrichmentStage::ClassifyTopics => &mut self.topics_classified_at,
        };
        *slot = Some(at);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct Article {
    pub id: ArticleId,
    #[builder(setter(into))]
    pub url: String,
    #[builder(setter(into))]
    pub title: String,
    #[builder(default, setter(strip_option, into))]
    pub source: Option<String>,
    #[builder(default, setter(into))]
    pub content: String,
    pub published_at: DateTime<Utc>,
    #[builder(default, setter(strip_option, into))]
    pub summary: Option<String>,
    #[builder(default)]
    pub keywords: Vec<String>,
    #[builder(default, setter(strip_option))]
    pub embedding: Option<Embedding>,
    #[builder(default, setter(strip_option))]
    pub entities: Option<EntitySet>,
    #[builder(default, setter(strip_option))]
    pub scores: Option<RelevanceScores>,
    #[builder(default, setter(strip_option))]
    pub topics: Option<Vec<String>>,
    /// Set once the article has been summarized with a related-coverage
    /// lookup. `None` means it predates contextual summaries.
    #[builder(default, setter(strip_option))]
    pub context_article_ids: Option<Vec<ArticleId>>,
    #[builder(default)]
    pub timestamps: ProcessingTimestamps,
}

impl Article {
    pub fn is_summarized(&self) -> bool {
        self.timestamps.summarized_at.is_some()
    }

    /// Whether this article is a work item for `stage`: the stage has not run
    /// yet and, for every stage after summarization, a summary exists.
    pub fn is_pending(&self, stage: EnrichmentStage) -> bool {
        if self.timestamps.completed(stage).is_some() {
            return false;
        }
        stage == EnrichmentStage::Summarize || self.is_summarized()
    }

    /// Summarized and embedded, but never summarized with related coverage.
    pub fn needs_context_summary(&self) -> bool {
        self.is_summarized() && self.embedding.is_some() && self.context_article_ids.is_none()
    }

    /// Members of the clustering working set carry both signals: an embedding
    /// and at least one extracted entity.
    pub fn is_clusterable(&self) -> bool {
        self.embedding.is_some() && self.entities.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// Apply a stage payload and stamp the stage's timestamp.
    pub fn apply(&mut self, result: StageResult, at: DateTime<Utc>) {
        let stage = result.stage();
        match result {
            StageResult::Summary(s) => {
                self.summary = Some(s.summary);
                self.keywords = s.keywords;
                self.context_article_ids = Some(s.context_article_ids);
            }
            StageResult::Embedding(e) => self.embedding = Some(e),
            StageResult::Scores(s) => self.scores = Some(s),
            StageResult::Entities(e) => self.entities = Some(e),
            StageResult::Topics(t) => self.topics = Some(t),
        }
        self.timestamps.mark(stage, at);
    }
}

/// An article as parsed from the ingest source, before it has an ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct NewArticle {
    #[builder(setter(into))]
    pub url: String,
    #[builder(setter(into))]
    pub title: String,
    #[builder(default, setter(strip_option, into))]
    pub source: Option<String>,
    #[builder(default, setter(into))]
    pub content: String,
    pub published_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub pulled_at: Option<DateTime<Utc>>,
}

// --- Threads ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub name: String,
    pub primary_entities: Vec<String>,
    pub member_article_ids: BTreeSet<ArticleId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- Digests ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    pub date: NaiveDate,
    pub content: String,
    pub article_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entities() -> EntitySet {
        EntitySet {
            companies: vec!["Apple".into(), "  ".into(), "OpenAI ".into()],
            people: vec!["Tim Cook".into()],
            products: vec!["apple".into()],
            legislation: vec![],
            other: vec![],
        }
    }

    #[test]
    fn iter_trims_and_skips_blank_names() {
        let set = entities();
        let names: Vec<&str> = set.iter().collect();
        assert_eq!(names, vec!["Apple", "OpenAI", "Tim Cook", "apple"]);
    }

    #[test]
    fn normalized_keys_merge_across_categories() {
        assert_eq!(
            entities().normalized_keys(),
            vec!["apple".to_string(), "openai".into(), "tim cook".into()]
        );
    }

    #[test]
    fn blank_only_entity_set_is_empty() {
        let set = EntitySet {
            other: vec![" ".into()],
            ..Default::default()
        };
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn pending_requires_summary_for_later_stages() {
        let mut article = Article::builder()
            .id(1)
            .url("https://example.com/a")
            .title("A")
            .published_at(Utc::now())
            .build();
        assert!(article.is_pending(EnrichmentStage::Summarize));
        assert!(!article.is_pending(EnrichmentStage::Score));

        article.apply(
            StageResult::Summary(Summary {
                summary: "s".into(),
                keywords: vec![],
                context_article_ids: vec![],
            }),
            Utc::now(),
        );
        assert!(!article.is_pending(EnrichmentStage::Summarize));
        assert!(article.is_pending(EnrichmentStage::Score));
        assert!(article.is_pending(EnrichmentStage::Embed));
    }

    #[test]
    fn only_context_free_summaries_need_a_redo() {
        let mut article = Article::builder()
            .id(1)
            .url("https://example.com/a")
            .title("A")
            .published_at(Utc::now())
            .summary("old summary")
            .embedding(Embedding(vec![1.0]))
            .build();
        article.timestamps.summarized_at = Some(Utc::now());
        assert!(article.needs_context_summary());

        article.apply(
            StageResult::Summary(Summary {
                summary: "s".into(),
                ..Default::default()
            }),
            Utc::now(),
        );
        assert_eq!(article.context_article_ids, Some(vec![]));
        assert!(!article.needs_context_summary());
    }

    #[test]
    fn l2_distance_is_euclidean() {
        let a = Embedding(vec![0.0, 0.0]);
        let b = Embedding(vec![3.0, 4.0]);
        assert!((a.l2_distance(&b) - 5.0).abs() < 1e-6);
    }
}
