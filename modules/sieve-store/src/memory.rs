// In-memory store for tests and dry runs. No database required.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};

use sieve_common::{
    Article, ArticleId, ArticleStore, Digest, DigestStore, Embedding, EnrichmentStage, NewArticle,
    RunLockStore, StageResult, Thread, ThreadId, ThreadStore,
};

/// Thread-safe in-memory implementation of every storage contract.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_article_id: ArticleId,
    next_thread_id: ThreadId,
    articles: BTreeMap<ArticleId, Article>,
    threads: BTreeMap<ThreadId, Thread>,
    digests: BTreeMap<NaiveDate, Digest>,
    run_locks: HashMap<String, DateTime<Utc>>,
    fail_nearest_search: bool,
    fail_writes: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_article_id: 1,
                next_thread_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Insert a fully built article, keeping its ID.
    pub fn seed(&self, article: Article) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_article_id = inner.next_article_id.max(article.id + 1);
        inner.articles.insert(article.id, article);
    }

    /// Insert a thread with the given members, keeping its ID.
    pub fn seed_thread(&self, id: ThreadId, name: &str, members: &[ArticleId]) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_thread_id = inner.next_thread_id.max(id + 1);
        let now = Utc::now();
        inner.threads.insert(
            id,
            Thread {
                id,
                name: name.to_string(),
                primary_entities: Vec::new(),
                member_article_ids: members.iter().copied().collect(),
                created_at: now,
                updated_at: now,
            },
        );
    }

    /// Make every embedding neighbour search fail.
    pub fn fail_nearest_search(&self) {
        self.inner.lock().unwrap().fail_nearest_search = true;
    }

    /// Make every write (inserts, write-backs, thread and digest writes) fail.
    pub fn fail_writes(&self) {
        self.inner.lock().unwrap().fail_writes = true;
    }

    pub fn article(&self, id: ArticleId) -> Option<Article> {
        self.inner.lock().unwrap().articles.get(&id).cloned()
    }

    pub fn articles(&self) -> Vec<Article> {
        self.inner.lock().unwrap().articles.values().cloned().collect()
    }

    pub fn threads(&self) -> Vec<Thread> {
        self.inner.lock().unwrap().threads.values().cloned().collect()
    }

    pub fn thread(&self, id: ThreadId) -> Option<Thread> {
        self.inner.lock().unwrap().threads.get(&id).cloned()
    }

    pub fn digest(&self, date: NaiveDate) -> Option<Digest> {
        self.inner.lock().unwrap().digests.get(&date).cloned()
    }

    /// Hold `name` as if another process had claimed it at `acquired_at`.
    pub fn seed_run_lock(&self, name: &str, acquired_at: DateTime<Utc>) {
        self.inner
            .lock()
            .unwrap()
            .run_locks
            .insert(name.to_string(), acquired_at);
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.inner.lock().unwrap().run_locks.contains_key(name)
    }
}

impl Inner {
    fn check_writable(&self) -> Result<()> {
        if self.fail_writes {
            bail!("memory store rejected write");
        }
        Ok(())
    }
}

/// Newest first, ties by ID descending.
fn newest_first(articles: &mut [Article]) {
    articles.sort_by(|a, b| b.published_at.cmp(&a.published_at).then(b.id.cmp(&a.id)));
}

fn window_start(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn insert_article(&self, article: &NewArticle) -> Result<Option<ArticleId>> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_writable()?;
        if inner.articles.values().any(|a| a.url == article.url) {
            return Ok(None);
        }
        let id = inner.next_article_id;
        inner.next_article_id += 1;

        let mut stored = Article::builder()
            .id(id)
            .url(article.url.clone())
            .title(article.title.clone())
            .content(article.content.clone())
            .published_at(article.published_at)
            .build();
        stored.source = article.source.clone();
        inner.articles.insert(id, stored);
        Ok(Some(id))
    }

    async fn article_exists(&self, url: &str) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.articles.values().any(|a| a.url == url))
    }

    async fn fetch_pending(&self, stage: EnrichmentStage) -> Result<Vec<Article>> {
        let inner = self.inner.lock().unwrap();
        let mut pending: Vec<Article> = inner
            .articles
            .values()
            .filter(|a| a.is_pending(stage))
            .cloned()
            .collect();
        newest_first(&mut pending);
        Ok(pending)
    }

    async fn persist_stage_result(&self, id: ArticleId, result: StageResult) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_writable()?;
        let Some(article) = inner.articles.get_mut(&id) else {
            bail!("Article {id} not found");
        };
        article.apply(result, Utc::now());
        Ok(())
    }

    async fn articles_since(&self, since: DateTime<Utc>) -> Result<Vec<Article>> {
        let inner = self.inner.lock().unwrap();
        let mut recent: Vec<Article> = inner
            .articles
            .values()
            .filter(|a| a.published_at >= since)
            .cloned()
            .collect();
        newest_first(&mut recent);
        Ok(recent)
    }

    async fn articles_by_ids(&self, ids: &[ArticleId]) -> Result<Vec<Article>> {
        let inner = self.inner.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| inner.articles.get(id).cloned())
            .collect())
    }

    async fn fetch_needing_context(&self) -> Result<Vec<Article>> {
        let inner = self.inner.lock().unwrap();
        let mut backlog: Vec<Article> = inner
            .articles
            .values()
            .filter(|a| a.needs_context_summary())
            .cloned()
            .collect();
        newest_first(&mut backlog);
        Ok(backlog)
    }
}

#[async_trait]
impl ThreadStore for MemoryStore {
    async fn articles_with_embedding_and_entities(&self, days: i64) -> Result<Vec<Article>> {
        let since = window_start(days);
        let inner = self.inner.lock().unwrap();
        let mut working: Vec<Article> = inner
            .articles
            .values()
            .filter(|a| a.embedding.is_some() && a.entities.is_some() && a.published_at >= since)
            .cloned()
            .collect();
        newest_first(&mut working);
        Ok(working)
    }

    async fn nearest_by_embedding(
        &self,
        vector: &Embedding,
        k: usize,
        days: i64,
        exclude: ArticleId,
    ) -> Result<Vec<ArticleId>> {
        let since = window_start(days);
        let inner = self.inner.lock().unwrap();
        if inner.fail_nearest_search {
            bail!("nearest-neighbour search unavailable");
        }
        let mut scored: Vec<(f32, ArticleId)> = inner
            .articles
            .values()
            .filter(|a| a.id != exclude && a.published_at >= since)
            .filter_map(|a| a.embedding.as_ref().map(|e| (vector.l2_distance(e), a.id)))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        Ok(scored.into_iter().take(k).map(|(_, id)| id).collect())
    }

    async fn thread_memberships(&self) -> Result<HashMap<ThreadId, HashSet<ArticleId>>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .threads
            .values()
            .map(|t| (t.id, t.member_article_ids.iter().copied().collect()))
            .collect())
    }

    async fn create_thread(
        &self,
        name: &str,
        primary_entities: &[String],
        members: &[ArticleId],
    ) -> Result<ThreadId> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_writable()?;
        let id = inner.next_thread_id;
        inner.next_thread_id += 1;
        let now = Utc::now();
        inner.threads.insert(
            id,
            Thread {
                id,
                name: name.to_string(),
                primary_entities: primary_entities.to_vec(),
                member_article_ids: members.iter().copied().collect::<BTreeSet<_>>(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn extend_thread(
        &self,
        id: ThreadId,
        new_members: &[ArticleId],
        name: &str,
        primary_entities: &[String],
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_writable()?;
        let Some(thread) = inner.threads.get_mut(&id) else {
            bail!("Thread {id} not found");
        };
        thread.member_article_ids.extend(new_members.iter().copied());
        thread.name = name.to_string();
        thread.primary_entities = primary_entities.to_vec();
        thread.updated_at = Utc::now();
        Ok(())
    }

    async fn list_threads(&self, limit: usize) -> Result<Vec<Thread>> {
        let inner = self.inner.lock().unwrap();
        let mut threads: Vec<Thread> = inner.threads.values().cloned().collect();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        threads.truncate(limit);
        Ok(threads)
    }
}

#[async_trait]
impl DigestStore for MemoryStore {
    async fn save_digest(&self, date: NaiveDate, content: &str, article_count: usize) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_writable()?;
        inner.digests.insert(
            date,
            Digest {
                date,
                content: content.to_string(),
                article_count,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl RunLockStore for MemoryStore {
    async fn try_lock(&self, name: &str, stale_after: Duration) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        match inner.run_locks.get(name) {
            Some(&acquired_at) if now - acquired_at < stale_after => Ok(false),
            _ => {
                inner.run_locks.insert(name.to_string(), now);
                Ok(true)
            }
        }
    }

    async fn unlock(&self, name: &str) -> Result<()> {
        self.inner.lock().unwrap().run_locks.remove(name);
        Ok(())
    }
}
