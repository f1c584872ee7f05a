//! The clustering result: owned storage, traversal and unwrap

use std::collections::HashMap;

use crate::cluster::{Cluster, ItemRef};
use crate::graph::Nodes;
use crate::types::{Id, Share};

/// Hierarchy score / evaluation measures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    /// Total final modularity
    pub modularity: f64,
}

/// The cluster hierarchy produced by the engine.
///
/// Owns the bottom-level nodes and every cluster ever materialised; all
/// cross-references between levels are arena indices, so they stay valid
/// for the hierarchy's lifetime.
#[derive(Debug)]
pub struct Hierarchy {
    nodes: Nodes,
    clusters: Vec<Cluster>,
    /// Cluster arena indices present on each level, bottom level first
    levels: Vec<Vec<u32>>,
    /// Final-level clusters without owners
    root: Vec<u32>,
    score: Score,
    /// Traversal frontier for [`traverse_next_level`](Self::traverse_next_level)
    cursor: usize,
}

impl Hierarchy {
    pub(crate) fn new(
        nodes: Nodes,
        clusters: Vec<Cluster>,
        levels: Vec<Vec<u32>>,
        root: Vec<u32>,
        score: Score,
    ) -> Self {
        Self {
            nodes,
            clusters,
            levels,
            root,
            score,
            cursor: 0,
        }
    }

    /// The permanent bottom level.
    pub fn nodes(&self) -> &Nodes {
        &self.nodes
    }

    /// Every cluster ever materialised.
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Arena indices of the clusters without owners on the final level.
    pub fn root(&self) -> &[u32] {
        &self.root
    }

    pub fn score(&self) -> &Score {
        &self.score
    }

    /// Number of materialised cluster levels.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// External id of an item, whichever arena it lives in.
    pub fn item_id(&self, item: ItemRef) -> Id {
        match item {
            ItemRef::Node(i) => self.nodes[i as usize].id,
            ItemRef::Cluster(c) => self.clusters[c as usize].id,
        }
    }

    /// Reset traversal back to the first (bottom) cluster level.
    pub fn reset_traversing(&mut self) {
        self.cursor = 0;
    }

    /// Traverse the next hierarchy level from the bottom, invoking `op`
    /// once per cluster with a flag marking the first call of the level.
    /// Returns false once the root level has been emitted.
    pub fn traverse_next_level<F>(&mut self, mut op: F) -> bool
    where
        F: FnMut(&Cluster, bool),
    {
        if self.cursor >= self.levels.len() {
            return false;
        }
        for (k, &ci) in self.levels[self.cursor].iter().enumerate() {
            op(&self.clusters[ci as usize], k == 0);
        }
        self.cursor += 1;
        self.cursor < self.levels.len()
    }

    /// Unwrap a cluster down to leaf nodes with fractional shares.
    ///
    /// The cluster starts with share 1; a descendant receives its owner's
    /// share divided by the descendant's owner count, and leaf nodes
    /// accumulate. The map is extended, not rewritten.
    pub fn unwrap(&self, cluster: u32, out: &mut HashMap<Id, Share>) {
        let mut level: HashMap<ItemRef, Share> =
            HashMap::from([(ItemRef::Cluster(cluster), 1.0)]);
        while !level.is_empty() {
            let mut next: HashMap<ItemRef, Share> = HashMap::new();
            for (item, share) in level {
                match item {
                    ItemRef::Cluster(ci) => {
                        for &d in &self.clusters[ci as usize].des {
                            let owners = match d {
                                ItemRef::Node(i) => self.nodes[i as usize].owners.len(),
                                ItemRef::Cluster(c) => self.clusters[c as usize].owners.len(),
                            };
                            let div = if owners > 0 { owners as Share } else { 1.0 };
                            *next.entry(d).or_insert(0.0) += share / div;
                        }
                    }
                    ItemRef::Node(i) => {
                        *out.entry(self.nodes[i as usize].id).or_insert(0.0) += share;
                    }
                }
            }
            level = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ItemRef;
    use crate::graph::Node;

    fn leaf_cluster(des: Vec<ItemRef>) -> Cluster {
        Cluster::new(des, None)
    }

    #[test]
    fn unwrap_splits_shares_by_owner_count() {
        // Two clusters sharing node 1; each root unwraps it at 1/2.
        let mut nodes = vec![Node::new(10), Node::new(11), Node::new(12)];
        nodes[0].owners = vec![0];
        nodes[1].owners = vec![0, 1];
        nodes[2].owners = vec![1];
        let clusters = vec![
            leaf_cluster(vec![ItemRef::Node(0), ItemRef::Node(1)]),
            leaf_cluster(vec![ItemRef::Node(1), ItemRef::Node(2)]),
        ];
        let h = Hierarchy::new(
            nodes,
            clusters,
            vec![vec![0, 1]],
            vec![0, 1],
            Score { modularity: 0.0 },
        );
        let mut shares = HashMap::new();
        h.unwrap(0, &mut shares);
        assert_eq!(shares.len(), 2);
        assert!((shares[&10] - 1.0).abs() < 1e-12);
        assert!((shares[&11] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn traversal_walks_levels_bottom_up() {
        let nodes = vec![Node::new(0), Node::new(1), Node::new(2), Node::new(3)];
        let clusters = vec![
            leaf_cluster(vec![ItemRef::Node(0), ItemRef::Node(1)]),
            leaf_cluster(vec![ItemRef::Node(2), ItemRef::Node(3)]),
            leaf_cluster(vec![ItemRef::Cluster(0), ItemRef::Cluster(1)]),
        ];
        let mut h = Hierarchy::new(
            nodes,
            clusters,
            vec![vec![0, 1], vec![2]],
            vec![2],
            Score { modularity: 0.0 },
        );
        let mut seen: Vec<(Id, bool)> = Vec::new();
        let more = h.traverse_next_level(|c, initial| seen.push((c.id, initial)));
        assert!(more, "a second level remains");
        assert_eq!(seen.len(), 2);
        assert!(seen[0].1 && !seen[1].1);
        seen.clear();
        let more = h.traverse_next_level(|c, initial| seen.push((c.id, initial)));
        assert!(!more, "root level was just emitted");
        assert_eq!(seen.len(), 1);
        h.reset_traversing();
        assert!(h.traverse_next_level(|_, _| {}));
    }
}
