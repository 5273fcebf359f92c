// Postgres persistence for articles, threads, and digests.

use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use pgvector::Vector;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use sieve_common::{
    Article, ArticleId, ArticleStore, DigestStore, Embedding, EnrichmentStage, EntitySet,
    NewArticle, ProcessingTimestamps, RelevanceScores, RunLockStore, StageResult, Thread, ThreadId,
    ThreadStore, DIMENSION_COUNT, DIMENSION_KEYS,
};

const ARTICLE_COLUMNS: &str = r#"
    id, url, title, source, content, published_at,
    summary, keywords, context_article_ids, embedding, entities, topics,
    d1_attention_economy, d2_data_sovereignty, d3_power_consolidation,
    d4_coercion_cooperation, d5_fear_trust, d6_democratization, d7_systemic_design,
    composite_score, tier, convergence_flag, score_rationale,
    summarized_at, embedded_at, scored_at, entities_extracted_at, topics_classified_at
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        info!("Database migrations applied");
        Ok(())
    }
}

/// Timestamp column owned by each stage.
fn stage_column(stage: EnrichmentStage) -> &'static str {
    match stage {
        EnrichmentStage::Summarize => "summarized_at",
        EnrichmentStage::Embed => "embedded_at",
        EnrichmentStage::Score => "scored_at",
        EnrichmentStage::ExtractEntities => "entities_extracted_at",
        EnrichmentStage::ClassifyTopics => "topics_classified_at",
    }
}

fn small(v: i16) -> u8 {
    v.clamp(0, u8::MAX as i16) as u8
}

fn row_to_article(r: &PgRow) -> sqlx::Result<Article> {
    let mut dimensions = [0u8; DIMENSION_COUNT];
    let mut all_scored = true;
    for (slot, key) in dimensions.iter_mut().zip(DIMENSION_KEYS) {
        match r.try_get::<Option<i16>, _>(key)? {
            Some(v) => *slot = small(v),
            None => all_scored = false,
        }
    }

    let timestamps = ProcessingTimestamps {
        summarized_at: r.try_get("summarized_at")?,
        embedded_at: r.try_get("embedded_at")?,
        scored_at: r.try_get("scored_at")?,
        entities_extracted_at: r.try_get("entities_extracted_at")?,
        topics_classified_at: r.try_get("topics_classified_at")?,
    };

    let scores = match (timestamps.scored_at, all_scored) {
        (Some(_), true) => Some(RelevanceScores {
            dimensions,
            composite: small(r.try_get::<Option<i16>, _>("composite_score")?.unwrap_or_default()),
            tier: small(r.try_get::<Option<i16>, _>("tier")?.unwrap_or(5)),
            convergence: r.try_get::<Option<bool>, _>("convergence_flag")?.unwrap_or_default(),
            rationale: r.try_get("score_rationale")?,
        }),
        _ => None,
    };

    Ok(Article {
        id: r.try_get("id")?,
        url: r.try_get("url")?,
        title: r.try_get("title")?,
        source: r.try_get("source")?,
        content: r.try_get("content")?,
        published_at: r.try_get("published_at")?,
        summary: r.try_get("summary")?,
        keywords: r.try_get("keywords")?,
        embedding: r
            .try_get::<Option<Vector>, _>("embedding")?
            .map(|v| Embedding(v.to_vec())),
        entities: r
            .try_get::<Option<Json<EntitySet>>, _>("entities")?
            .map(|j| j.0),
        scores,
        topics: r.try_get("topics")?,
        context_article_ids: r.try_get("context_article_ids")?,
        timestamps,
    })
}

fn collect_articles(rows: Vec<PgRow>) -> Result<Vec<Article>> {
    rows.iter()
        .map(row_to_article)
        .collect::<sqlx::Result<Vec<_>>>()
        .context("Failed to decode article row")
}

#[async_trait]
impl ArticleStore for PgStore {
    async fn insert_article(&self, article: &NewArticle) -> Result<Option<ArticleId>> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO articles (url, title, source, content, published_at, pulled_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (url) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&article.url)
        .bind(&article.title)
        .bind(&article.source)
        .bind(&article.content)
        .bind(article.published_at)
        .bind(article.pulled_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn article_exists(&self, url: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM articles WHERE url = $1)",
        )
        .bind(url)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn fetch_pending(&self, stage: EnrichmentStage) -> Result<Vec<Article>> {
        let gate = match stage {
            EnrichmentStage::Summarize => "",
            _ => "AND summarized_at IS NOT NULL",
        };
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles \
             WHERE {} IS NULL {gate} \
             ORDER BY published_at DESC, id DESC",
            stage_column(stage)
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        collect_articles(rows)
    }

    async fn persist_stage_result(&self, id: ArticleId, result: StageResult) -> Result<()> {
        let affected = match result {
            StageResult::Summary(s) => sqlx::query(
                "UPDATE articles SET summary = $2, keywords = $3, context_article_ids = $4, \
                 summarized_at = NOW() WHERE id = $1",
            )
            .bind(id)
            .bind(s.summary)
            .bind(s.keywords)
            .bind(s.context_article_ids)
            .execute(&self.pool)
            .await?,
            StageResult::Embedding(e) => sqlx::query(
                "UPDATE articles SET embedding = $2, embedded_at = NOW() WHERE id = $1",
            )
            .bind(id)
            .bind(Vector::from(e.0))
            .execute(&self.pool)
            .await?,
            StageResult::Scores(s) => {
                let sql = format!(
                    "UPDATE articles SET {}, composite_score = $9, tier = $10, \
                     convergence_flag = $11, score_rationale = $12, scored_at = NOW() \
                     WHERE id = $1",
                    DIMENSION_KEYS
                        .iter()
                        .enumerate()
                        .map(|(i, key)| format!("{key} = ${}", i + 2))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                let mut query = sqlx::query(&sql).bind(id);
                for value in s.dimensions {
                    query = query.bind(value as i16);
                }
                query
                    .bind(s.composite as i16)
                    .bind(s.tier as i16)
                    .bind(s.convergence)
                    .bind(s.rationale)
                    .execute(&self.pool)
                    .await?
            }
            StageResult::Entities(entities) => sqlx::query(
                "UPDATE articles SET entities = $2, entities_extracted_at = NOW() WHERE id = $1",
            )
            .bind(id)
            .bind(Json(entities))
            .execute(&self.pool)
            .await?,
            StageResult::Topics(topics) => sqlx::query(
                "UPDATE articles SET topics = $2, topics_classified_at = NOW() WHERE id = $1",
            )
            .bind(id)
            .bind(topics)
            .execute(&self.pool)
            .await?,
        };

        if affected.rows_affected() == 0 {
            bail!("Article {id} not found");
        }
        Ok(())
    }

    async fn articles_since(&self, since: DateTime<Utc>) -> Result<Vec<Article>> {
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles \
             WHERE published_at >= $1 \
             ORDER BY published_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql).bind(since).fetch_all(&self.pool).await?;
        collect_articles(rows)
    }

    async fn articles_by_ids(&self, ids: &[ArticleId]) -> Result<Vec<Article>> {
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles \
             WHERE id = ANY($1) \
             ORDER BY array_position($1, id)"
        );
        let rows = sqlx::query(&sql).bind(ids).fetch_all(&self.pool).await?;
        collect_articles(rows)
    }

    async fn fetch_needing_context(&self) -> Result<Vec<Article>> {
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles \
             WHERE summarized_at IS NOT NULL \
               AND embedded_at IS NOT NULL \
               AND context_article_ids IS NULL \
             ORDER BY published_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        collect_articles(rows)
    }
}

#[async_trait]
impl ThreadStore for PgStore {
    async fn articles_with_embedding_and_entities(&self, days: i64) -> Result<Vec<Article>> {
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles \
             WHERE embedding IS NOT NULL AND entities IS NOT NULL \
               AND published_at >= NOW() - make_interval(days => $1) \
             ORDER BY published_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(days as i32)
            .fetch_all(&self.pool)
            .await?;
        collect_articles(rows)
    }

    async fn nearest_by_embedding(
        &self,
        vector: &Embedding,
        k: usize,
        days: i64,
        exclude: ArticleId,
    ) -> Result<Vec<ArticleId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM articles
            WHERE embedding IS NOT NULL
              AND id <> $2
              AND published_at >= NOW() - make_interval(days => $3)
            ORDER BY embedding <-> $1, id
            LIMIT $4
            "#,
        )
        .bind(Vector::from(vector.0.clone()))
        .bind(exclude)
        .bind(days as i32)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn thread_memberships(&self) -> Result<HashMap<ThreadId, HashSet<ArticleId>>> {
        let rows = sqlx::query_as::<_, (i64, Option<i64>)>(
            r#"
            SELECT t.id, at.article_id
            FROM threads t
            LEFT JOIN article_threads at ON at.thread_id = t.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut memberships: HashMap<ThreadId, HashSet<ArticleId>> = HashMap::new();
        for (thread_id, article_id) in rows {
            let members = memberships.entry(thread_id).or_default();
            if let Some(article_id) = article_id {
                members.insert(article_id);
            }
        }
        Ok(memberships)
    }

    async fn create_thread(
        &self,
        name: &str,
        primary_entities: &[String],
        members: &[ArticleId],
    ) -> Result<ThreadId> {
        let mut tx = self.pool.begin().await?;
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO threads (name, primary_entities) VALUES ($1, $2) RETURNING id",
        )
        .bind(name)
        .bind(primary_entities)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO article_threads (thread_id, article_id)
            SELECT $1, UNNEST($2::BIGINT[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id)
        .bind(members)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn extend_thread(
        &self,
        id: ThreadId,
        new_members: &[ArticleId],
        name: &str,
        primary_entities: &[String],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE threads SET name = $2, primary_entities = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(name)
        .bind(primary_entities)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            bail!("Thread {id} not found");
        }

        sqlx::query(
            r#"
            INSERT INTO article_threads (thread_id, article_id)
            SELECT $1, UNNEST($2::BIGINT[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id)
        .bind(new_members)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_threads(&self, limit: usize) -> Result<Vec<Thread>> {
        let rows = sqlx::query_as::<_, (i64, String, Vec<String>, DateTime<Utc>, DateTime<Utc>)>(
            r#"
            SELECT id, name, primary_entities, created_at, updated_at
            FROM threads
            ORDER BY updated_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<i64> = rows.iter().map(|r| r.0).collect();
        let members = sqlx::query_as::<_, (i64, i64)>(
            "SELECT thread_id, article_id FROM article_threads WHERE thread_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_thread: HashMap<ThreadId, BTreeSet<ArticleId>> = HashMap::new();
        for (thread_id, article_id) in members {
            by_thread.entry(thread_id).or_default().insert(article_id);
        }

        Ok(rows
            .into_iter()
            .map(|(id, name, primary_entities, created_at, updated_at)| Thread {
                id,
                name,
                primary_entities,
                member_article_ids: by_thread.remove(&id).unwrap_or_default(),
                created_at,
                updated_at,
            })
            .collect())
    }
}

#[async_trait]
impl DigestStore for PgStore {
    async fn save_digest(&self, date: NaiveDate, content: &str, article_count: usize) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO digests (digest_date, content, article_count)
            VALUES ($1, $2, $3)
            ON CONFLICT (digest_date) DO UPDATE
            SET content = EXCLUDED.content,
                article_count = EXCLUDED.article_count,
                created_at = NOW()
            "#,
        )
        .bind(date)
        .bind(content)
        .bind(article_count as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RunLockStore for PgStore {
    async fn try_lock(&self, name: &str, stale_after: Duration) -> Result<bool> {
        // Locks left behind by killed processes.
        let reaped = sqlx::query("DELETE FROM run_locks WHERE name = $1 AND acquired_at < $2")
            .bind(name)
            .bind(Utc::now() - stale_after)
            .execute(&self.pool)
            .await?;
        if reaped.rows_affected() > 0 {
            warn!(lock = name, "Reclaimed stale run lock");
        }

        let acquired = sqlx::query_scalar::<_, String>(
            "INSERT INTO run_locks (name) VALUES ($1) ON CONFLICT (name) DO NOTHING RETURNING name",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(acquired.is_some())
    }

    async fn unlock(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM run_locks WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
