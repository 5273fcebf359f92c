use std::collections::{BTreeSet, HashMap, VecDeque};

use sieve_common::ArticleId;

/// Undirected article graph stored as an arena: nodes are indices into
/// `ids`, adjacency is kept sorted so traversal order is reproducible.
#[derive(Debug, Default)]
pub struct ArticleGraph {
    ids: Vec<ArticleId>,
    index: HashMap<ArticleId, usize>,
    adjacency: Vec<BTreeSet<usize>>,
}

impl ArticleGraph {
    /// One node per distinct ID, in iteration order.
    pub fn new(ids: impl IntoIterator<Item = ArticleId>) -> Self {
        let mut graph = Self::default();
        for id in ids {
            if graph.index.contains_key(&id) {
                continue;
            }
            graph.index.insert(id, graph.ids.len());
            graph.ids.push(id);
            graph.adjacency.push(BTreeSet::new());
        }
        graph
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(BTreeSet::len).sum::<usize>() / 2
    }

    pub fn contains(&self, id: ArticleId) -> bool {
        self.index.contains_key(&id)
    }

    /// Link two articles. Self-loops and IDs outside the graph are ignored.
    /// Returns true when a new edge was added.
    pub fn add_edge(&mut self, a: ArticleId, b: ArticleId) -> bool {
        if a == b {
            return false;
        }
        let (Some(&ia), Some(&ib)) = (self.index.get(&a), self.index.get(&b)) else {
            return false;
        };
        let inserted = self.adjacency[ia].insert(ib);
        self.adjacency[ib].insert(ia);
        inserted
    }

    /// Connected components by breadth-first search. Components come out in
    /// order of their earliest node, and each component lists its members in
    /// node order. Isolated nodes are singleton components.
    pub fn connected_components(&self) -> Vec<Vec<ArticleId>> {
        let mut visited = vec![false; self.ids.len()];
        let mut components = Vec::new();
        let mut queue = VecDeque::new();

        for start in 0..self.ids.len() {
            if visited[start] {
                continue;
            }
            visited[start] = true;
            queue.push_back(start);
            let mut members = Vec::new();

            while let Some(node) = queue.pop_front() {
                members.push(node);
                for &next in &self.adjacency[node] {
                    if !visited[next] {
                        visited[next] = true;
                        queue.push_back(next);
                    }
                }
            }

            members.sort_unstable();
            components.push(members.into_iter().map(|i| self.ids[i]).collect());
        }
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_follow_edges_transitively() {
        let mut graph = ArticleGraph::new([10, 20, 30, 40, 50]);
        graph.add_edge(10, 30);
        graph.add_edge(30, 50);
        graph.add_edge(20, 40);

        assert_eq!(
            graph.connected_components(),
            vec![vec![10, 30, 50], vec![20, 40]]
        );
    }

    #[test]
    fn isolated_nodes_are_singletons() {
        let graph = ArticleGraph::new([1, 2]);
        assert_eq!(graph.connected_components(), vec![vec![1], vec![2]]);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn edges_are_undirected_and_deduplicated() {
        let mut graph = ArticleGraph::new([1, 2, 3]);
        assert!(graph.add_edge(1, 2));
        assert!(!graph.add_edge(2, 1));
        assert!(!graph.add_edge(1, 1));
        assert!(!graph.add_edge(1, 99));
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.contains(3));
        assert!(!graph.contains(99));
    }

    #[test]
    fn members_listed_in_node_order_not_visit_order() {
        let mut graph = ArticleGraph::new([5, 4, 3, 2, 1]);
        graph.add_edge(5, 1);
        graph.add_edge(1, 4);
        assert_eq!(
            graph.connected_components(),
            vec![vec![5, 4, 1], vec![3], vec![2]]
        );
    }

    #[test]
    fn duplicate_ids_collapse_to_one_node() {
        let graph = ArticleGraph::new([7, 7, 8]);
        assert_eq!(graph.node_count(), 2);
    }
}
