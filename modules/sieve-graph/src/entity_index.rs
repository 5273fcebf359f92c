use std::collections::{HashMap, HashSet};

use sieve_common::{Article, ArticleId};

/// Inverted index from normalized entity key to the articles mentioning it.
///
/// Keys are trimmed and lowercased, so "OpenAI" and "openai " collide, and
/// an entity listed under two categories of one article counts once.
#[derive(Debug, Default)]
pub struct EntityIndex {
    postings: HashMap<String, Vec<ArticleId>>,
    keys_by_article: HashMap<ArticleId, Vec<String>>,
}

impl EntityIndex {
    pub fn build<'a>(articles: impl IntoIterator<Item = &'a Article>) -> Self {
        let mut index = Self::default();
        for article in articles {
            let Some(entities) = &article.entities else {
                continue;
            };
            let keys = entities.normalized_keys();
            for key in &keys {
                index.postings.entry(key.clone()).or_default().push(article.id);
            }
            index.keys_by_article.insert(article.id, keys);
        }
        index
    }

    /// Number of distinct entity keys.
    pub fn key_count(&self) -> usize {
        self.postings.len()
    }

    pub fn keys_for(&self, id: ArticleId) -> &[String] {
        self.keys_by_article
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Articles sharing at least `min_overlap` distinct keys with `id`.
    /// The article itself is never included.
    pub fn neighbors(&self, id: ArticleId, min_overlap: usize) -> HashSet<ArticleId> {
        let mut shared: HashMap<ArticleId, usize> = HashMap::new();
        for key in self.keys_for(id) {
            let Some(posting) = self.postings.get(key) else {
                continue;
            };
            for &other in posting {
                if other != id {
                    *shared.entry(other).or_default() += 1;
                }
            }
        }
        shared
            .into_iter()
            .filter(|&(_, count)| count >= min_overlap.max(1))
            .map(|(other, _)| other)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sieve_common::EntitySet;

    use super::*;

    fn article(id: ArticleId, companies: &[&str], people: &[&str]) -> Article {
        Article::builder()
            .id(id)
            .url(format!("https://example.com/{id}"))
            .title(format!("Article {id}"))
            .published_at(Utc::now())
            .entities(EntitySet {
                companies: companies.iter().map(|s| s.to_string()).collect(),
                people: people.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            })
            .build()
    }

    #[test]
    fn neighbors_require_minimum_shared_keys() {
        let articles = vec![
            article(1, &["OpenAI", "Microsoft"], &["Sam Altman"]),
            article(2, &["openai ", "Google"], &["Sam Altman"]),
            article(3, &["OpenAI"], &[]),
        ];
        let index = EntityIndex::build(&articles);

        assert_eq!(index.neighbors(1, 2), HashSet::from([2]));
        assert_eq!(index.neighbors(3, 2), HashSet::new());
        assert_eq!(index.neighbors(3, 1), HashSet::from([1, 2]));
    }

    #[test]
    fn duplicate_entity_across_categories_counts_once() {
        let articles = vec![
            article(1, &["Apple"], &["apple"]),
            article(2, &["Apple"], &[]),
        ];
        let index = EntityIndex::build(&articles);
        assert_eq!(index.keys_for(1), ["apple".to_string()]);
        assert!(index.neighbors(1, 2).is_empty());
        assert_eq!(index.key_count(), 1);
    }

    #[test]
    fn unknown_article_has_no_neighbors() {
        let index = EntityIndex::build(&[article(1, &["A", "B"], &[])]);
        assert!(index.neighbors(99, 1).is_empty());
    }
}
