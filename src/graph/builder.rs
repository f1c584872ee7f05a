//! Incremental graph construction with edge/arc reconciliation

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::GraphError;
use crate::graph::{InputLink, Node, Nodes};
use crate::types::{Id, Weight};

/// Builder for the bottom level of a hierarchy.
///
/// Accepts node and link additions from a caller, deduplicates ids and
/// reconciles edge vs. arc semantics: an undirected (edge) addition is
/// halved and inserted in both directions so that the sum of arc weights
/// equals the edge weight. On the unweighted path the arc weight is the
/// compile-time constant 1 and is not halved; the self-weight is doubled
/// instead to compensate for the 2x counting rule.
#[derive(Debug)]
pub struct Graph {
    /// Node arena; finalize() hands it over
    nodes: Nodes,

    /// Mapping from external ids to arena indices
    index: HashMap<Id, u32>,

    /// Whether link additions carry caller-supplied weights
    weighted: bool,

    /// Whether any directed addition occurred
    directed: bool,

    finalized: bool,

    /// Shuffle source; present only in shuffle mode
    rng: Option<StdRng>,
}

impl Graph {
    /// Create a builder. `capacity` is an advisory maximum-size hint.
    pub fn new(weighted: bool, capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            weighted,
            directed: false,
            finalized: false,
            rng: None,
        }
    }

    /// Create a builder in shuffle mode: every insertion picks a random
    /// position so that result stability under reordering can be tested.
    pub fn with_shuffle(weighted: bool, capacity: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Some(rng),
            ..Self::new(weighted, capacity)
        }
    }

    /// Whether any directed addition occurred.
    pub fn directed(&self) -> bool {
        self.directed
    }

    /// Number of nodes added so far.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Reset the builder for reuse; existing nodes are discarded.
    pub fn reinit(&mut self, capacity: usize) {
        self.nodes = Vec::with_capacity(capacity);
        self.index = HashMap::with_capacity(capacity);
        self.directed = false;
        self.finalized = false;
    }

    fn check_extendable(&self) -> Result<(), GraphError> {
        if self.finalized {
            return Err(GraphError::Finalized);
        }
        Ok(())
    }

    fn insert_node(&mut self, id: Id) -> Result<u32, GraphError> {
        if self.index.contains_key(&id) {
            return Err(GraphError::DuplicateNode { id });
        }
        let idx = self.nodes.len() as u32;
        self.nodes.push(Node::new(id));
        self.index.insert(id, idx);
        Ok(idx)
    }

    fn get_or_insert_node(&mut self, id: Id) -> u32 {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.nodes.len() as u32;
        self.nodes.push(Node::new(id));
        self.index.insert(id, idx);
        idx
    }

    /// Add leaf nodes with caller-supplied ids; duplicates are rejected.
    pub fn add_nodes(&mut self, ids: &[Id]) -> Result<(), GraphError> {
        self.check_extendable()?;
        for &id in ids {
            self.insert_node(id)?;
        }
        Ok(())
    }

    /// Add a contiguous range of nodes, `beg` inclusive to `end` exclusive.
    pub fn add_node_range(&mut self, beg: Id, end: Id) -> Result<(), GraphError> {
        self.check_extendable()?;
        if end < beg {
            return Err(GraphError::ReversedRange { beg, end });
        }
        self.index.reserve((end - beg) as usize);
        for id in beg..end {
            self.insert_node(id)?;
        }
        Ok(())
    }

    /// Add outgoing links from an existing node; every destination must
    /// already exist.
    pub fn add_node_links(
        &mut self,
        src: Id,
        links: &[InputLink],
        directed: bool,
    ) -> Result<(), GraphError> {
        self.check_extendable()?;
        self.directed |= directed;
        let src_idx = *self
            .index
            .get(&src)
            .ok_or(GraphError::UnknownNode { id: src })?;
        for link in links {
            let dst_idx = *self
                .index
                .get(&link.id)
                .ok_or(GraphError::UnknownNode { id: link.id })?;
            self.add_link(src_idx, dst_idx, link.weight, directed)?;
        }
        Ok(())
    }

    /// As [`add_node_links`](Self::add_node_links), but auto-creates any
    /// node referenced but not yet present.
    pub fn add_node_and_links(
        &mut self,
        src: Id,
        links: &[InputLink],
        directed: bool,
    ) -> Result<(), GraphError> {
        self.check_extendable()?;
        self.directed |= directed;
        let src_idx = self.get_or_insert_node(src);
        for link in links {
            let dst_idx = self.get_or_insert_node(link.id);
            self.add_link(src_idx, dst_idx, link.weight, directed)?;
        }
        Ok(())
    }

    /// Insert one raw link, reconciling self-references and edge halving.
    fn add_link(
        &mut self,
        src: u32,
        dst: u32,
        weight: Weight,
        directed: bool,
    ) -> Result<(), GraphError> {
        if weight < 0.0 {
            return Err(GraphError::NegativeWeight {
                id: self.nodes[dst as usize].id,
                weight,
            });
        }
        if src == dst {
            // A link terminating on its own source feeds self-weight; a
            // self-entry in the link sequence is forbidden.
            let node = &mut self.nodes[src as usize];
            if node.self_weight != 0.0 {
                return Err(GraphError::SelfWeightReassigned { id: node.id });
            }
            // Unweighted undirected input counts every edge twice (one arc
            // each way), so the self-weight doubles to keep ratios uniform.
            let factor = if !self.weighted && !directed { 2.0 } else { 1.0 };
            node.self_weight = weight * factor;
            return Ok(());
        }
        if directed {
            self.push_link(src, dst, weight);
        } else {
            // Halve the edge weight so the arc pair sums back to it; the
            // unweighted constant 1 cannot be halved and is stored as is.
            let w = if self.weighted { weight / 2.0 } else { weight };
            self.push_link(src, dst, w);
            self.push_link(dst, src, w);
        }
        Ok(())
    }

    fn push_link(&mut self, src: u32, dst: u32, weight: Weight) {
        let link = crate::graph::Link { dest: dst, weight };
        let links = &mut self.nodes[src as usize].links;
        match &mut self.rng {
            Some(rng) if !links.is_empty() => {
                let pos = rng.gen_range(0..=links.len());
                links.insert(pos, link);
            }
            _ => links.push(link),
        }
    }

    /// Complete initialization and return the immutable node set; further
    /// additions fail.
    pub fn finalize(&mut self) -> Result<Nodes, GraphError> {
        self.check_extendable()?;
        self.finalized = true;
        self.index.clear();
        let mut nodes = std::mem::take(&mut self.nodes);
        if let Some(rng) = &mut self.rng {
            shuffle_nodes(&mut nodes, rng);
        }
        Ok(nodes)
    }
}

/// Permute node storage order and remap link destinations accordingly.
fn shuffle_nodes(nodes: &mut Nodes, rng: &mut StdRng) {
    let n = nodes.len();
    let mut perm: Vec<u32> = (0..n as u32).collect();
    // Fisher-Yates
    for i in (1..n).rev() {
        let j = rng.gen_range(0..=i);
        perm.swap(i, j);
    }
    let mut old_to_new = vec![0u32; n];
    for (new_idx, &old_idx) in perm.iter().enumerate() {
        old_to_new[old_idx as usize] = new_idx as u32;
    }
    let mut shuffled: Vec<Node> = Vec::with_capacity(n);
    for &old_idx in &perm {
        let mut node = nodes[old_idx as usize].clone();
        for link in &mut node.links {
            link.dest = old_to_new[link.dest as usize];
        }
        shuffled.push(node);
    }
    *nodes = shuffled;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_nodes() {
        let mut g = Graph::new(true, 4);
        g.add_nodes(&[0, 1, 2]).unwrap();
        assert_eq!(
            g.add_nodes(&[1]),
            Err(GraphError::DuplicateNode { id: 1 })
        );
    }

    #[test]
    fn rejects_reversed_range() {
        let mut g = Graph::new(true, 0);
        assert_eq!(
            g.add_node_range(5, 2),
            Err(GraphError::ReversedRange { beg: 5, end: 2 })
        );
    }

    #[test]
    fn rejects_links_to_unknown_nodes() {
        let mut g = Graph::new(true, 2);
        g.add_nodes(&[0, 1]).unwrap();
        let err = g.add_node_links(0, &[InputLink::new(7, 1.0)], false);
        assert_eq!(err, Err(GraphError::UnknownNode { id: 7 }));
    }

    #[test]
    fn rejects_extension_after_finalize() {
        let mut g = Graph::new(true, 2);
        g.add_nodes(&[0, 1]).unwrap();
        g.finalize().unwrap();
        assert_eq!(g.add_nodes(&[2]), Err(GraphError::Finalized));
    }

    #[test]
    fn undirected_weighted_edge_is_halved_both_ways() {
        let mut g = Graph::new(true, 2);
        g.add_nodes(&[0, 1]).unwrap();
        g.add_node_links(0, &[InputLink::new(1, 3.0)], false).unwrap();
        let nodes = g.finalize().unwrap();
        assert_eq!(nodes[0].links.len(), 1);
        assert_eq!(nodes[1].links.len(), 1);
        assert_eq!(nodes[0].links[0].weight, 1.5);
        assert_eq!(nodes[1].links[0].weight, 1.5);
    }

    #[test]
    fn unweighted_edge_keeps_unit_arcs() {
        let mut g = Graph::new(false, 2);
        g.add_nodes(&[0, 1]).unwrap();
        g.add_node_links(0, &[InputLink::unweighted(1)], false).unwrap();
        let nodes = g.finalize().unwrap();
        assert_eq!(nodes[0].links[0].weight, 1.0);
        assert_eq!(nodes[1].links[0].weight, 1.0);
    }

    #[test]
    fn self_reference_feeds_self_weight() {
        let mut g = Graph::new(true, 1);
        g.add_nodes(&[4]).unwrap();
        g.add_node_links(4, &[InputLink::new(4, 2.5)], false).unwrap();
        let nodes = g.finalize().unwrap();
        assert!(nodes[0].links.is_empty());
        assert_eq!(nodes[0].self_weight, 2.5);
    }

    #[test]
    fn unweighted_undirected_self_weight_doubles() {
        let mut g = Graph::new(false, 1);
        g.add_nodes(&[0]).unwrap();
        g.add_node_links(0, &[InputLink::unweighted(0)], false).unwrap();
        let nodes = g.finalize().unwrap();
        assert_eq!(nodes[0].self_weight, 2.0);
    }

    #[test]
    fn self_weight_assigned_once() {
        let mut g = Graph::new(true, 1);
        g.add_nodes(&[0]).unwrap();
        g.add_node_links(0, &[InputLink::new(0, 1.0)], false).unwrap();
        let err = g.add_node_links(0, &[InputLink::new(0, 1.0)], false);
        assert_eq!(err, Err(GraphError::SelfWeightReassigned { id: 0 }));
    }

    #[test]
    fn directed_addition_marks_graph_directed() {
        let mut g = Graph::new(true, 2);
        g.add_node_and_links(0, &[InputLink::new(1, 1.0)], true).unwrap();
        assert!(g.directed());
        let nodes = g.finalize().unwrap();
        assert_eq!(nodes[0].links.len(), 1);
        assert!(nodes[1].links.is_empty());
    }

    #[test]
    fn auto_creates_referenced_nodes() {
        let mut g = Graph::new(true, 0);
        g.add_node_and_links(3, &[InputLink::new(8, 1.0)], false).unwrap();
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn shuffle_preserves_topology() {
        let links: &[InputLink] = &[InputLink::new(1, 1.0), InputLink::new(2, 1.0)];
        let mut g = Graph::with_shuffle(true, 3, Some(42));
        g.add_nodes(&[0, 1, 2]).unwrap();
        g.add_node_links(0, links, false).unwrap();
        let nodes = g.finalize().unwrap();
        // Same ids, same total weight, whatever the storage order.
        let mut ids: Vec<_> = nodes.iter().map(|n| n.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2]);
        let total: f32 = nodes.iter().flat_map(|n| &n.links).map(|l| l.weight).sum();
        assert_eq!(total, 2.0);
        for node in &nodes {
            for link in &node.links {
                assert_ne!(nodes[link.dest as usize].id, node.id);
            }
        }
    }
}
