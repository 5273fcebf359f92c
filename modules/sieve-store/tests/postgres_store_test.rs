//! Integration tests for PgStore against a pgvector Postgres container.
//! Run with: cargo test -p sieve-store --features test-utils -- --ignored

#![cfg(feature = "test-utils")]

use chrono::{Duration, NaiveDate, Utc};

use sieve_common::{
    ArticleStore, DigestStore, Embedding, EnrichmentStage, EntitySet, NewArticle, RelevanceScores,
    RunLockStore, StageResult, Summary, ThreadStore,
};
use sieve_store::testutil::postgres_container;

fn new_article(url: &str, age_days: i64) -> NewArticle {
    NewArticle::builder()
        .url(url)
        .title(format!("Title for {url}"))
        .source("TechCrunch")
        .content("Body text")
        .published_at(Utc::now() - Duration::days(age_days))
        .build()
}

fn summary() -> StageResult {
    StageResult::Summary(Summary {
        summary: "A summary".into(),
        keywords: vec!["ai".into(), "policy".into()],
        context_article_ids: vec![],
    })
}

#[tokio::test]
#[ignore]
async fn insert_skips_duplicate_urls() {
    let (_container, store) = postgres_container().await;

    let first = store.insert_article(&new_article("https://a", 0)).await.unwrap();
    let again = store.insert_article(&new_article("https://a", 0)).await.unwrap();

    assert!(first.is_some());
    assert_eq!(again, None);
    assert!(store.article_exists("https://a").await.unwrap());
    assert!(!store.article_exists("https://b").await.unwrap());
}

#[tokio::test]
#[ignore]
async fn stage_results_round_trip_through_columns() {
    let (_container, store) = postgres_container().await;
    let id = store
        .insert_article(&new_article("https://a", 0))
        .await
        .unwrap()
        .unwrap();

    assert!(store.fetch_pending(EnrichmentStage::Score).await.unwrap().is_empty());
    store.persist_stage_result(id, summary()).await.unwrap();

    let scores = RelevanceScores {
        dimensions: [3, 2, 2, 2, 2, 1, 0],
        composite: 12,
        tier: 2,
        convergence: true,
        rationale: Some("broad".into()),
    };
    store
        .persist_stage_result(id, StageResult::Scores(scores.clone()))
        .await
        .unwrap();
    store
        .persist_stage_result(
            id,
            StageResult::Entities(EntitySet {
                companies: vec!["OpenAI".into()],
                ..Default::default()
            }),
        )
        .await
        .unwrap();
    store
        .persist_stage_result(id, StageResult::Embedding(Embedding(vec![0.1, 0.2, 0.3])))
        .await
        .unwrap();

    let recent = store
        .articles_since(Utc::now() - Duration::days(1))
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);
    let article = &recent[0];
    assert_eq!(article.keywords, vec!["ai", "policy"]);
    assert_eq!(article.scores.as_ref(), Some(&scores));
    assert_eq!(article.entities.as_ref().unwrap().companies, vec!["OpenAI"]);
    assert_eq!(article.embedding.as_ref().unwrap().dims(), 3);

    let pending_topics = store
        .fetch_pending(EnrichmentStage::ClassifyTopics)
        .await
        .unwrap();
    assert_eq!(pending_topics.len(), 1);
    assert!(store.fetch_pending(EnrichmentStage::Score).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn context_ids_are_stored_with_the_summary() {
    let (_container, store) = postgres_container().await;
    let mut ids = Vec::new();
    for url in ["https://c/1", "https://c/2"] {
        let id = store.insert_article(&new_article(url, 0)).await.unwrap().unwrap();
        ids.push(id);
    }
    // Summarized and embedded before related coverage was looked up.
    store
        .persist_stage_result(ids[0], summary())
        .await
        .unwrap();
    sqlx::query("UPDATE articles SET context_article_ids = NULL WHERE id = $1")
        .bind(ids[0])
        .execute(store.pool())
        .await
        .unwrap();
    store
        .persist_stage_result(ids[0], StageResult::Embedding(Embedding(vec![1.0, 0.0])))
        .await
        .unwrap();

    let backlog = store.fetch_needing_context().await.unwrap();
    assert_eq!(backlog.len(), 1);
    assert_eq!(backlog[0].context_article_ids, None);

    store
        .persist_stage_result(
            ids[0],
            StageResult::Summary(Summary {
                summary: "With context".into(),
                context_article_ids: vec![ids[1]],
                ..Default::default()
            }),
        )
        .await
        .unwrap();
    assert!(store.fetch_needing_context().await.unwrap().is_empty());

    let found = store.articles_by_ids(&[ids[1], ids[0]]).await.unwrap();
    assert_eq!(found.iter().map(|a| a.id).collect::<Vec<_>>(), vec![ids[1], ids[0]]);
    assert_eq!(found[1].context_article_ids, Some(vec![ids[1]]));
}

#[tokio::test]
#[ignore]
async fn write_back_to_missing_article_fails() {
    let (_container, store) = postgres_container().await;
    assert!(store.persist_stage_result(4242, summary()).await.is_err());
}

#[tokio::test]
#[ignore]
async fn nearest_search_orders_by_distance_inside_window() {
    let (_container, store) = postgres_container().await;
    let mut ids = Vec::new();
    for (i, (vector, age)) in [
        (vec![0.0, 0.0], 0),
        (vec![1.0, 0.0], 0),
        (vec![3.0, 0.0], 0),
        (vec![0.5, 0.0], 45),
    ]
    .into_iter()
    .enumerate()
    {
        let id = store
            .insert_article(&new_article(&format!("https://n/{i}"), age))
            .await
            .unwrap()
            .unwrap();
        store
            .persist_stage_result(id, StageResult::Embedding(Embedding(vector)))
            .await
            .unwrap();
        ids.push(id);
    }

    let near = store
        .nearest_by_embedding(&Embedding(vec![0.0, 0.0]), 5, 30, ids[0])
        .await
        .unwrap();
    assert_eq!(near, vec![ids[1], ids[2]]);
}

#[tokio::test]
#[ignore]
async fn threads_track_memberships() {
    let (_container, store) = postgres_container().await;
    let mut ids = Vec::new();
    for i in 0..3 {
        ids.push(
            store
                .insert_article(&new_article(&format!("https://t/{i}"), 0))
                .await
                .unwrap()
                .unwrap(),
        );
    }

    let thread_id = store
        .create_thread("OpenAI", &["OpenAI".into()], &ids[..2])
        .await
        .unwrap();
    store
        .extend_thread(thread_id, &ids[1..], "Google", &["Google".into(), "OpenAI".into()])
        .await
        .unwrap();

    let memberships = store.thread_memberships().await.unwrap();
    assert_eq!(memberships[&thread_id].len(), 3);

    let threads = store.list_threads(10).await.unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].name, "Google");
    assert_eq!(threads[0].member_article_ids.len(), 3);
}

#[tokio::test]
#[ignore]
async fn digest_upserts_by_date() {
    let (_container, store) = postgres_container().await;
    let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
    store.save_digest(date, "first", 1).await.unwrap();
    store.save_digest(date, "second", 2).await.unwrap();

    let (content, count): (String, i32) =
        sqlx::query_as("SELECT content, article_count FROM digests WHERE digest_date = $1")
            .bind(date)
            .fetch_one(store.pool())
            .await
            .unwrap();
    assert_eq!(content, "second");
    assert_eq!(count, 2);
}

#[tokio::test]
#[ignore]
async fn run_lock_is_shared_through_the_database() {
    let (_container, store) = postgres_container().await;
    // A second handle on the same database behaves like another process.
    let other = sieve_store::PgStore::new(store.pool().clone());
    let stale_after = Duration::hours(3);

    assert!(store.try_lock("pipeline", stale_after).await.unwrap());
    assert!(!other.try_lock("pipeline", stale_after).await.unwrap());

    store.unlock("pipeline").await.unwrap();
    assert!(other.try_lock("pipeline", stale_after).await.unwrap());

    sqlx::query("UPDATE run_locks SET acquired_at = NOW() - INTERVAL '4 hours'")
        .execute(store.pool())
        .await
        .unwrap();
    assert!(store.try_lock("pipeline", stale_after).await.unwrap());
}
