//! Thread metrics: pure functions for reconciling components with existing
//! threads and naming them from their members' entities.

use std::collections::{HashMap, HashSet};

use sieve_common::{ArticleId, EntitySet, ThreadId};

/// Name used when a component's members carry no entities at all.
pub const UNNAMED_THREAD: &str = "Unnamed Thread";

/// Share of `component` already in `members`, 0.0 for an empty component.
pub fn overlap_ratio(component: &[ArticleId], members: &HashSet<ArticleId>) -> f64 {
    if component.is_empty() {
        return 0.0;
    }
    let shared = component.iter().filter(|id| members.contains(id)).count();
    shared as f64 / component.len() as f64
}

/// The existing thread a component should extend, if any.
///
/// Candidates need an overlap ratio strictly above `min_ratio`. Among them the
/// one sharing the most articles wins; equal overlaps go to the lowest thread ID.
pub fn best_matching_thread(
    component: &[ArticleId],
    memberships: &HashMap<ThreadId, HashSet<ArticleId>>,
    min_ratio: f64,
) -> Option<ThreadId> {
    if component.is_empty() {
        return None;
    }

    let mut thread_ids: Vec<ThreadId> = memberships.keys().copied().collect();
    thread_ids.sort_unstable();

    let mut best: Option<(ThreadId, usize)> = None;
    for thread_id in thread_ids {
        let members = &memberships[&thread_id];
        if overlap_ratio(component, members) <= min_ratio {
            continue;
        }
        let shared = component.iter().filter(|id| members.contains(id)).count();
        match best {
            Some((_, top)) if shared <= top => {}
            _ => best = Some((thread_id, shared)),
        }
    }
    best.map(|(thread_id, _)| thread_id)
}

/// Derive a thread's name and primary entities from its members' entity sets.
///
/// Entity names are counted exactly as written (after trimming). The name is
/// the most frequent entity; equal counts keep first-encounter order. Returns
/// up to `top_n` primary entities.
pub fn name_thread<'a>(
    entity_sets: impl IntoIterator<Item = &'a EntitySet>,
    top_n: usize,
) -> (String, Vec<String>) {
    let mut order: Vec<(&'a str, usize)> = Vec::new();
    let mut position: HashMap<&'a str, usize> = HashMap::new();

    for set in entity_sets {
        for name in set.iter() {
            match position.get(name) {
                Some(&i) => order[i].1 += 1,
                None => {
                    position.insert(name, order.len());
                    order.push((name, 1));
                }
            }
        }
    }

    // Stable sort keeps encounter order among equal counts.
    order.sort_by(|a, b| b.1.cmp(&a.1));

    let name = order
        .first()
        .map_or_else(|| UNNAMED_THREAD.to_string(), |(top, _)| top.to_string());
    let primary = order
        .iter()
        .take(top_n)
        .map(|(entity, _)| entity.to_string())
        .collect();
    (name, primary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memberships(entries: &[(ThreadId, &[ArticleId])]) -> HashMap<ThreadId, HashSet<ArticleId>> {
        entries
            .iter()
            .map(|(id, members)| (*id, members.iter().copied().collect()))
            .collect()
    }

    fn companies(names: &[&str]) -> EntitySet {
        EntitySet {
            companies: names.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    // --- best_matching_thread tests ---

    #[test]
    fn half_overlap_is_not_enough() {
        let existing = memberships(&[(1, &[1, 2, 3, 4, 5])]);
        assert_eq!(best_matching_thread(&[3, 4, 5, 6, 7, 8], &existing, 0.5), None);
    }

    #[test]
    fn majority_overlap_matches() {
        let existing = memberships(&[(1, &[1, 2, 3, 4, 5])]);
        assert_eq!(best_matching_thread(&[3, 4, 5, 6], &existing, 0.5), Some(1));
    }

    #[test]
    fn largest_overlap_wins() {
        let existing = memberships(&[(1, &[1, 2, 3]), (2, &[1, 2, 3, 4])]);
        assert_eq!(best_matching_thread(&[1, 2, 3, 4, 9], &existing, 0.5), Some(2));
    }

    #[test]
    fn equal_overlap_goes_to_lowest_thread_id() {
        let existing = memberships(&[(7, &[1, 2, 3]), (3, &[1, 2, 3]), (5, &[1, 2, 3])]);
        assert_eq!(best_matching_thread(&[1, 2, 3, 4], &existing, 0.5), Some(3));
    }

    #[test]
    fn no_threads_no_match() {
        assert_eq!(best_matching_thread(&[1, 2], &HashMap::new(), 0.5), None);
        assert_eq!(best_matching_thread(&[], &memberships(&[(1, &[1])]), 0.5), None);
    }

    #[test]
    fn overlap_ratio_counts_component_share() {
        let members: HashSet<ArticleId> = [1, 2, 3].into_iter().collect();
        assert_eq!(overlap_ratio(&[1, 2, 3, 4], &members), 0.75);
        assert_eq!(overlap_ratio(&[], &members), 0.0);
    }

    // --- name_thread tests ---

    #[test]
    fn name_is_most_frequent_entity() {
        let sets = [
            companies(&["OpenAI", "Microsoft"]),
            companies(&["OpenAI", "Google", "Microsoft"]),
            companies(&["OpenAI"]),
        ];
        let (name, primary) = name_thread(&sets, 5);
        assert_eq!(name, "OpenAI");
        assert_eq!(primary, vec!["OpenAI", "Microsoft", "Google"]);
    }

    #[test]
    fn ties_keep_first_encounter_order() {
        let sets = [companies(&["Zeta", "Alpha"]), companies(&["Beta"])];
        let (name, primary) = name_thread(&sets, 2);
        assert_eq!(name, "Zeta");
        assert_eq!(primary, vec!["Zeta", "Alpha"]);
    }

    #[test]
    fn runner_up_only_lands_in_primaries() {
        let sets = [companies(&["OpenAI", "Microsoft"]), companies(&["OpenAI"])];
        let (name, primary) = name_thread(&sets, 5);
        assert_eq!(name, "OpenAI");
        assert_eq!(primary, vec!["OpenAI", "Microsoft"]);
    }

    #[test]
    fn single_entity_names_thread_alone() {
        let sets = [companies(&["Nvidia"]), companies(&[" Nvidia "])];
        let (name, primary) = name_thread(&sets, 5);
        assert_eq!(name, "Nvidia");
        assert_eq!(primary, vec!["Nvidia"]);
    }

    #[test]
    fn no_entities_is_unnamed() {
        let sets = [EntitySet::default()];
        let (name, primary) = name_thread(&sets, 5);
        assert_eq!(name, UNNAMED_THREAD);
        assert!(primary.is_empty());
    }

    #[test]
    fn counting_is_case_sensitive() {
        let sets = [companies(&["apple", "Apple", "Apple"])];
        let (name, _) = name_thread(&sets, 5);
        assert_eq!(name, "Apple");
    }
}
