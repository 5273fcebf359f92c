// Test mocks for the pipeline.
//
// Three mocks matching the collaborator boundaries:
// - MockEnricher (Enricher): deterministic payloads, scripted failures per stage
// - MockIngestor (Ingestor): canned results, optional delay for overlap tests
// - FaultyStore (ArticleStore + ThreadStore): wraps a MemoryStore and fails chosen queries
//
// Plus helpers for building articles.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sieve_common::{
    Article, ArticleId, ArticleStore, Embedding, EnrichmentStage, EntitySet, NewArticle,
    StageResult, Summary, Thread, ThreadId, ThreadStore,
};
use sieve_store::MemoryStore;

use crate::enrichment::{EnrichError, Enricher, FailureKind};
use crate::ingest::{CompressResult, IngestResult, Ingestor};
use crate::scoring::DimensionScores;

// ---------------------------------------------------------------------------
// MockEnricher
// ---------------------------------------------------------------------------

/// Succeeds with deterministic payloads unless a failure has been queued for
/// the stage. Queued failures are consumed one per call, in order.
/// Builder pattern: `.on_entities()`, `.on_embedding()`, `.on_scores()`,
/// `.on_briefing()`.
#[derive(Default)]
pub struct MockEnricher {
    entities: HashMap<ArticleId, EntitySet>,
    embeddings: HashMap<ArticleId, Vec<f32>>,
    scores: Option<[u8; 7]>,
    briefing: Option<String>,
    query_embedding: Option<Vec<f32>>,
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    failures: HashMap<EnrichmentStage, VecDeque<EnrichError>>,
    digest_failure: Option<EnrichError>,
    calls: HashMap<EnrichmentStage, usize>,
    digest_materials: Vec<String>,
    summary_contexts: HashMap<ArticleId, Vec<ArticleId>>,
}

impl MockEnricher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_entities(mut self, id: ArticleId, entities: EntitySet) -> Self {
        self.entities.insert(id, entities);
        self
    }

    pub fn on_embedding(mut self, id: ArticleId, vector: Vec<f32>) -> Self {
        self.embeddings.insert(id, vector);
        self
    }

    /// Dimension scores returned for every article.
    pub fn on_scores(mut self, dimensions: [u8; 7]) -> Self {
        self.scores = Some(dimensions);
        self
    }

    /// Vector returned by `embed_text`. Defaults to the origin in three dimensions.
    pub fn on_query_embedding(mut self, vector: Vec<f32>) -> Self {
        self.query_embedding = Some(vector);
        self
    }

    /// Briefing text returned by `generate_digest`.
    pub fn on_briefing(mut self, briefing: &str) -> Self {
        self.briefing = Some(briefing.to_string());
        self
    }

    /// Queue `times` failures of `kind` for `stage`.
    pub fn fail_next(&self, stage: EnrichmentStage, kind: FailureKind, times: usize) {
        let mut state = self.state.lock().unwrap();
        let queue = state.failures.entry(stage).or_default();
        for _ in 0..times {
            queue.push_back(EnrichError::new(kind, format!("mock {stage} failure")));
        }
    }

    pub fn fail_digest(&self, kind: FailureKind) {
        self.state.lock().unwrap().digest_failure =
            Some(EnrichError::new(kind, "mock digest failure"));
    }

    pub fn calls(&self, stage: EnrichmentStage) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&stage)
            .copied()
            .unwrap_or(0)
    }

    pub fn digest_materials(&self) -> Vec<String> {
        self.state.lock().unwrap().digest_materials.clone()
    }

    /// IDs of the related articles passed with the last summary of `id`.
    pub fn summary_context(&self, id: ArticleId) -> Option<Vec<ArticleId>> {
        self.state.lock().unwrap().summary_contexts.get(&id).cloned()
    }

    fn record(&self, stage: EnrichmentStage) -> Result<(), EnrichError> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(stage).or_default() += 1;
        match state.failures.get_mut(&stage).and_then(VecDeque::pop_front) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Enricher for MockEnricher {
    async fn summarize(
        &self,
        article: &Article,
        context: &[Article],
    ) -> Result<Summary, EnrichError> {
        self.state
            .lock()
            .unwrap()
            .summary_contexts
            .insert(article.id, context.iter().map(|a| a.id).collect());
        self.record(EnrichmentStage::Summarize)?;
        Ok(Summary {
            summary: format!("Summary of {}", article.title),
            keywords: vec!["keyword".to_string()],
            ..Default::default()
        })
    }

    async fn embed(&self, article: &Article) -> Result<Embedding, EnrichError> {
        self.record(EnrichmentStage::Embed)?;
        let vector = self
            .embeddings
            .get(&article.id)
            .cloned()
            .unwrap_or_else(|| vec![article.id as f32, 0.0, 0.0]);
        Ok(Embedding(vector))
    }

    async fn embed_text(&self, _text: &str) -> Result<Embedding, EnrichError> {
        let vector = self.query_embedding.clone().unwrap_or_else(|| vec![0.0; 3]);
        Ok(Embedding(vector))
    }

    async fn score(&self, _article: &Article) -> Result<DimensionScores, EnrichError> {
        self.record(EnrichmentStage::Score)?;
        Ok(DimensionScores {
            dimensions: self.scores.unwrap_or([1; 7]),
            rationale: Some("mock rationale".to_string()),
        })
    }

    async fn extract_entities(&self, article: &Article) -> Result<EntitySet, EnrichError> {
        self.record(EnrichmentStage::ExtractEntities)?;
        Ok(self.entities.get(&article.id).cloned().unwrap_or_default())
    }

    async fn classify_topics(&self, _article: &Article) -> Result<Vec<String>, EnrichError> {
        self.record(EnrichmentStage::ClassifyTopics)?;
        Ok(vec!["ai".to_string()])
    }

    async fn generate_digest(&self, material: &str) -> Result<String, EnrichError> {
        let mut state = self.state.lock().unwrap();
        state.digest_materials.push(material.to_string());
        match state.digest_failure.take() {
            Some(e) => Err(e),
            None => Ok(self
                .briefing
                .clone()
                .unwrap_or_else(|| "## Today\nMock briefing.".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// MockIngestor
// ---------------------------------------------------------------------------

/// Returns canned results. Errors take precedence when set.
#[derive(Default)]
pub struct MockIngestor {
    ingest: IngestResult,
    compress: CompressResult,
    ingest_error: Option<String>,
    compress_error: Option<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_ingest(mut self, result: IngestResult) -> Self {
        self.ingest = result;
        self
    }

    pub fn on_compress(mut self, result: CompressResult) -> Self {
        self.compress = result;
        self
    }

    pub fn failing_ingest(mut self, message: &str) -> Self {
        self.ingest_error = Some(message.to_string());
        self
    }

    pub fn failing_compress(mut self, message: &str) -> Self {
        self.compress_error = Some(message.to_string());
        self
    }

    /// Sleep before answering `ingest`, to keep a run in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Operations called so far, in order ("ingest", "compress").
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Ingestor for MockIngestor {
    async fn ingest(&self, _path: &Path) -> Result<IngestResult> {
        self.calls.lock().unwrap().push("ingest");
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.ingest_error {
            bail!("{message}");
        }
        Ok(self.ingest.clone())
    }

    async fn compress(&self, _path: &Path) -> Result<CompressResult> {
        self.calls.lock().unwrap().push("compress");
        if let Some(message) = &self.compress_error {
            bail!("{message}");
        }
        Ok(self.compress.clone())
    }
}

// ---------------------------------------------------------------------------
// FaultyStore
// ---------------------------------------------------------------------------

/// Delegates to a `MemoryStore`, failing the queries it has been told to fail.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    failing_stages: Mutex<HashSet<EnrichmentStage>>,
    fail_working_set: Mutex<bool>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing_stages: Mutex::new(HashSet::new()),
            fail_working_set: Mutex::new(false),
        }
    }

    /// Make `fetch_pending(stage)` return an error.
    pub fn fail_fetch(&self, stage: EnrichmentStage) {
        self.failing_stages.lock().unwrap().insert(stage);
    }

    /// Make the thread detector's working-set query return an error.
    pub fn fail_working_set(&self) {
        *self.fail_working_set.lock().unwrap() = true;
    }
}

#[async_trait]
impl ArticleStore for FaultyStore {
    async fn insert_article(&self, article: &NewArticle) -> Result<Option<ArticleId>> {
        self.inner.insert_article(article).await
    }

    async fn article_exists(&self, url: &str) -> Result<bool> {
        self.inner.article_exists(url).await
    }

    async fn fetch_pending(&self, stage: EnrichmentStage) -> Result<Vec<Article>> {
        if self.failing_stages.lock().unwrap().contains(&stage) {
            bail!("database unavailable");
        }
        self.inner.fetch_pending(stage).await
    }

    async fn persist_stage_result(&self, id: ArticleId, result: StageResult) -> Result<()> {
        self.inner.persist_stage_result(id, result).await
    }

    async fn articles_since(&self, since: DateTime<Utc>) -> Result<Vec<Article>> {
        self.inner.articles_since(since).await
    }

    async fn articles_by_ids(&self, ids: &[ArticleId]) -> Result<Vec<Article>> {
        self.inner.articles_by_ids(ids).await
    }

    async fn fetch_needing_context(&self) -> Result<Vec<Article>> {
        self.inner.fetch_needing_context().await
    }
}

#[async_trait]
impl ThreadStore for FaultyStore {
    async fn articles_with_embedding_and_entities(&self, days: i64) -> Result<Vec<Article>> {
        if *self.fail_working_set.lock().unwrap() {
            bail!("database unavailable");
        }
        self.inner.articles_with_embedding_and_entities(days).await
    }

    async fn nearest_by_embedding(
        &self,
        vector: &Embedding,
        k: usize,
        days: i64,
        exclude: ArticleId,
    ) -> Result<Vec<ArticleId>> {
        self.inner.nearest_by_embedding(vector, k, days, exclude).await
    }

    async fn thread_memberships(&self) -> Result<HashMap<ThreadId, HashSet<ArticleId>>> {
        self.inner.thread_memberships().await
    }

    async fn create_thread(
        &self,
        name: &str,
        primary_entities: &[String],
        members: &[ArticleId],
    ) -> Result<ThreadId> {
        self.inner.create_thread(name, primary_entities, members).await
    }

    async fn extend_thread(
        &self,
        id: ThreadId,
        new_members: &[ArticleId],
        name: &str,
        primary_entities: &[String],
    ) -> Result<()> {
        self.inner
            .extend_thread(id, new_members, name, primary_entities)
            .await
    }

    async fn list_threads(&self, limit: usize) -> Result<Vec<Thread>> {
        self.inner.list_threads(limit).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Unenriched article published `age_hours` ago.
pub fn raw_article(id: ArticleId, title: &str, age_hours: i64) -> Article {
    Article::builder()
        .id(id)
        .url(format!("https://example.com/{id}"))
        .title(title)
        .source("The Verge")
        .content(format!("Full text of {title}."))
        .published_at(Utc::now() - chrono::Duration::hours(age_hours))
        .build()
}

/// Entity set with the given companies.
pub fn companies(names: &[&str]) -> EntitySet {
    EntitySet {
        companies: names.iter().map(|n| n.to_string()).collect(),
        ..Default::default()
    }
}
