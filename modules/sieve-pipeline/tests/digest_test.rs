use std::sync::Arc;

use chrono::Utc;

use sieve_pipeline::digest::NO_ARTICLES_MESSAGE;
use sieve_pipeline::testing::{raw_article, MockEnricher};
use sieve_pipeline::DigestJob;
use sieve_store::MemoryStore;

#[tokio::test]
async fn empty_day_stores_placeholder_without_generation() {
    let store = Arc::new(MemoryStore::new());
    store.seed(raw_article(1, "Old news", 48));
    let enricher = Arc::new(MockEnricher::new());
    let job = DigestJob::new(store.clone(), store.clone(), enricher.clone());

    let report = job.run().await.unwrap();

    assert_eq!(report.article_count, 0);
    assert!(enricher.digest_materials().is_empty());
    let digest = store.digest(Utc::now().date_naive()).unwrap();
    assert_eq!(digest.content, NO_ARTICLES_MESSAGE);
    assert_eq!(digest.article_count, 0);
}

#[tokio::test]
async fn digest_covers_the_last_day_and_lists_sources() {
    let store = Arc::new(MemoryStore::new());
    store.seed(raw_article(1, "Chip export rules", 3));
    store.seed(raw_article(2, "Data broker fines", 5));
    store.seed(raw_article(3, "Last week", 24 * 7));
    let enricher = Arc::new(MockEnricher::new());
    let job = DigestJob::new(store.clone(), store.clone(), enricher.clone());

    let report = job.run().await.unwrap();

    assert_eq!(report.article_count, 2);
    let materials = enricher.digest_materials();
    assert_eq!(materials.len(), 1);
    assert!(materials[0].contains("### \"Chip export rules\""));
    assert!(!materials[0].contains("Last week"));

    let digest = store.digest(report.date).unwrap();
    assert_eq!(digest.article_count, 2);
    assert!(digest.content.starts_with("## Today\nMock briefing."));
    assert!(digest.content.contains("## Sources\n\n**The Verge**\n"));
    assert!(digest
        .content
        .contains("- [Data broker fines](https://example.com/2)"));
}

#[tokio::test]
async fn regenerating_replaces_the_days_digest() {
    let store = Arc::new(MemoryStore::new());
    let enricher = Arc::new(MockEnricher::new());
    let job = DigestJob::new(store.clone(), store.clone(), enricher);

    job.run().await.unwrap();
    store.seed(raw_article(1, "Late breaking", 1));
    job.run().await.unwrap();

    let digest = store.digest(Utc::now().date_naive()).unwrap();
    assert_eq!(digest.article_count, 1);
}

#[tokio::test]
async fn briefing_mentions_become_article_links() {
    let store = Arc::new(MemoryStore::new());
    store.seed(raw_article(1, "Chip export rules", 3));
    store.seed(raw_article(2, "Data broker fines", 5));
    let enricher = Arc::new(MockEnricher::new().on_briefing(
        "## Today\nSee [https://example.com/1] and https://example.com/2. Also [Chip export rules].",
    ));
    let job = DigestJob::new(store.clone(), store.clone(), enricher);

    let report = job.run().await.unwrap();

    let digest = store.digest(report.date).unwrap();
    assert!(digest.content.starts_with(
        "## Today\nSee [Chip export rules](https://example.com/1) and \
         [Data broker fines](https://example.com/2). \
         Also [Chip export rules](https://example.com/1)."
    ));
}
