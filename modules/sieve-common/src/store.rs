// Storage contracts the pipeline and the thread detector depend on.
//
// ArticleStore: ingest inserts plus per-stage work-item queries and write-backs.
// ThreadStore: clustering reads (working set, KNN) and thread writes.
// DigestStore: daily digest persistence.
// RunLockStore: named run locks shared by every process using the same database.
//
// Implementations live in sieve-store (Postgres and in-memory).

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::types::{
    Article, ArticleId, EnrichmentStage, Embedding, NewArticle, StageResult, Thread, ThreadId,
};

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Insert a new article. Returns `None` when an article with the same URL exists.
    async fn insert_article(&self, article: &NewArticle) -> Result<Option<ArticleId>>;

    async fn article_exists(&self, url: &str) -> Result<bool>;

    /// Articles eligible for `stage`, newest first (ties broken by id, descending).
    async fn fetch_pending(&self, stage: EnrichmentStage) -> Result<Vec<Article>>;

    /// Write one stage's payload and stamp its timestamp. Idempotent for equal payloads.
    async fn persist_stage_result(&self, id: ArticleId, result: StageResult) -> Result<()>;

    /// Articles published at or after `since`, newest first.
    async fn articles_since(&self, since: DateTime<Utc>) -> Result<Vec<Article>>;

    /// The articles with these IDs, in the order given. Unknown IDs are skipped.
    async fn articles_by_ids(&self, ids: &[ArticleId]) -> Result<Vec<Article>>;

    /// Summarized, embedded articles never summarized with related coverage,
    /// newest first.
    async fn fetch_needing_context(&self) -> Result<Vec<Article>>;
}

#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Articles with both an embedding and extracted entities published in the
    /// last `days` days, newest first.
    async fn articles_with_embedding_and_entities(&self, days: i64) -> Result<Vec<Article>>;

    /// IDs of the `k` nearest articles to `vector` published in the last `days`
    /// days, excluding `exclude`, nearest first.
    async fn nearest_by_embedding(
        &self,
        vector: &Embedding,
        k: usize,
        days: i64,
        exclude: ArticleId,
    ) -> Result<Vec<ArticleId>>;

    /// Every thread's current member set.
    async fn thread_memberships(&self) -> Result<HashMap<ThreadId, HashSet<ArticleId>>>;

    async fn create_thread(
        &self,
        name: &str,
        primary_entities: &[String],
        members: &[ArticleId],
    ) -> Result<ThreadId>;

    /// Add members (existing memberships are ignored) and overwrite the derived fields.
    async fn extend_thread(
        &self,
        id: ThreadId,
        new_members: &[ArticleId],
        name: &str,
        primary_entities: &[String],
    ) -> Result<()>;

    /// Most recently updated threads first.
    async fn list_threads(&self, limit: usize) -> Result<Vec<Thread>>;
}

#[async_trait]
pub trait DigestStore: Send + Sync {
    /// Store the digest for `date`, replacing any earlier one.
    async fn save_digest(&self, date: NaiveDate, content: &str, article_count: usize) -> Result<()>;
}

#[async_trait]
pub trait RunLockStore: Send + Sync {
    /// Atomically claim the lock called `name`. Returns false if it is held.
    /// A lock older than `stale_after` is treated as abandoned and reclaimed.
    async fn try_lock(&self, name: &str, stale_after: Duration) -> Result<bool>;

    async fn unlock(&self, name: &str) -> Result<()>;
}
