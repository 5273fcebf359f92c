use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use sieve_common::{Article, ArticleId, ThreadStore, ThreadsConfig};

use crate::entity_index::EntityIndex;
use crate::similarity::ArticleGraph;
use crate::thread_metrics::{best_matching_thread, name_thread};

/// Groups recent articles into story threads:
/// 1. Load the working set (embedding + entities, inside the lookback window)
/// 2. Link each article to its embedding neighbours and entity-sharing peers
/// 3. Take connected components at or above the size threshold
/// 4. Extend a matching existing thread or create a new one
pub struct ThreadDetector {
    store: Arc<dyn ThreadStore>,
    config: ThreadsConfig,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadDetectionStats {
    pub threads_created: usize,
    pub threads_updated: usize,
    /// New memberships written this run.
    pub articles_linked: usize,
}

impl fmt::Display for ThreadDetectionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Thread Detection Complete ===")?;
        writeln!(f, "Threads created: {}", self.threads_created)?;
        writeln!(f, "Threads updated: {}", self.threads_updated)?;
        writeln!(f, "Articles linked: {}", self.articles_linked)?;
        Ok(())
    }
}

impl ThreadDetector {
    pub fn new(store: Arc<dyn ThreadStore>, config: ThreadsConfig) -> Self {
        Self { store, config }
    }

    pub async fn detect(&self) -> Result<ThreadDetectionStats> {
        let mut stats = ThreadDetectionStats::default();

        let articles: Vec<Article> = self
            .store
            .articles_with_embedding_and_entities(self.config.lookback_days)
            .await?
            .into_iter()
            .filter(Article::is_clusterable)
            .collect();

        if articles.len() < self.config.cluster_threshold {
            info!(
                articles = articles.len(),
                min = self.config.cluster_threshold,
                "Not enough articles for thread detection"
            );
            return Ok(stats);
        }

        let graph = self.build_graph(&articles).await;
        info!(
            articles = graph.node_count(),
            edges = graph.edge_count(),
            "Article graph built"
        );

        let components: Vec<Vec<ArticleId>> = graph
            .connected_components()
            .into_iter()
            .filter(|c| c.len() >= self.config.cluster_threshold)
            .collect();

        if components.is_empty() {
            info!("No components large enough to form a thread");
            return Ok(stats);
        }

        let by_id: HashMap<ArticleId, &Article> = articles.iter().map(|a| (a.id, a)).collect();
        let mut memberships = self.store.thread_memberships().await?;

        for component in &components {
            let (name, primary) = name_thread(
                component
                    .iter()
                    .filter_map(|id| by_id.get(id).copied())
                    .filter_map(|a| a.entities.as_ref()),
                self.config.primary_entity_count,
            );

            match best_matching_thread(component, &memberships, self.config.thread_overlap_ratio) {
                Some(thread_id) => {
                    let members = memberships.entry(thread_id).or_default();
                    let new_members: Vec<ArticleId> = component
                        .iter()
                        .copied()
                        .filter(|id| !members.contains(id))
                        .collect();
                    if new_members.is_empty() {
                        debug!(thread_id, "Component already fully in thread");
                        continue;
                    }

                    self.store
                        .extend_thread(thread_id, &new_members, &name, &primary)
                        .await?;
                    members.extend(new_members.iter().copied());

                    info!(thread_id, added = new_members.len(), name = name.as_str(), "Extended thread");
                    stats.threads_updated += 1;
                    stats.articles_linked += new_members.len();
                }
                None => {
                    let thread_id = self.store.create_thread(&name, &primary, component).await?;
                    memberships.insert(thread_id, component.iter().copied().collect());

                    info!(thread_id, members = component.len(), name = name.as_str(), "Created thread");
                    stats.threads_created += 1;
                    stats.articles_linked += component.len();
                }
            }
        }

        info!(
            created = stats.threads_created,
            updated = stats.threads_updated,
            linked = stats.articles_linked,
            "Thread detection finished"
        );
        Ok(stats)
    }

    /// Edges come from two signals: the k nearest embeddings inside the window
    /// and entity overlap. Neighbours outside the working set are dropped.
    async fn build_graph(&self, articles: &[Article]) -> ArticleGraph {
        let mut graph = ArticleGraph::new(articles.iter().map(|a| a.id));
        let index = EntityIndex::build(articles);
        info!(entities = index.key_count(), "Entity index built");

        for article in articles {
            let similar = self.embedding_neighbors(article).await;
            let sharing = index.neighbors(article.id, self.config.entity_overlap_min);
            for neighbor in similar.into_iter().chain(sharing) {
                graph.add_edge(article.id, neighbor);
            }
        }
        graph
    }

    async fn embedding_neighbors(&self, article: &Article) -> HashSet<ArticleId> {
        let Some(embedding) = &article.embedding else {
            return HashSet::new();
        };
        match self
            .store
            .nearest_by_embedding(
                embedding,
                self.config.embedding_top_k,
                self.config.lookback_days,
                article.id,
            )
            .await
        {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!(article_id = article.id, error = %e, "Embedding neighbour search failed");
                HashSet::new()
            }
        }
    }
}
