//! Cluster entities and the clustering engine module

pub mod engine;
pub mod modularity;

pub use engine::cluster;

use std::sync::atomic::{AtomicU32, Ordering};

use crate::types::{AccWeight, Id};

/// Process-wide cluster id counter. Two engines running in parallel draw
/// disjoint id sets; callers must not rely on absolute values.
static CLUSTER_UID: AtomicU32 = AtomicU32::new(0);

pub(crate) fn next_cluster_id() -> Id {
    CLUSTER_UID.fetch_add(1, Ordering::Relaxed)
}

/// Reference to an item at some hierarchy level: either a leaf node or a
/// cluster, addressed by its arena index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemRef {
    Node(u32),
    Cluster(u32),
}

/// Accumulated link from a cluster to a sibling item at the same level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccLink {
    /// Destination item
    pub dest: ItemRef,

    /// Total accumulated outbound weight on this link
    pub weight: AccWeight,
}

/// An internal hierarchy node: a set of descendants merged in one pass.
#[derive(Debug, Clone)]
pub struct Cluster {
    /// Engine-assigned id, drawn from the process-wide counter
    pub id: Id,

    /// Accumulated links to sibling items, sorted by destination id
    pub links: Vec<AccLink>,

    /// The items this cluster was merged from; never fewer than two
    pub des: Vec<ItemRef>,

    /// The descendant contributing the highest mutual gain, if any
    pub core: Option<ItemRef>,

    /// Sum of descendants' self-weights plus intra-cluster link mass
    pub self_weight: AccWeight,

    /// Arena indices of owner clusters; more than one under overlap
    pub owners: Vec<u32>,
}

impl Cluster {
    pub(crate) fn new(des: Vec<ItemRef>, core: Option<ItemRef>) -> Self {
        Self {
            id: next_cluster_id(),
            links: Vec::new(),
            des,
            core,
            self_weight: 0.0,
            owners: Vec::new(),
        }
    }

    /// Whether the descendants of this cluster are leaf nodes.
    pub fn has_leaf_descendants(&self) -> bool {
        matches!(self.des.first(), Some(ItemRef::Node(_)))
    }
}

/// Clusterability of an item within the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clusterable {
    /// Max gain is non-positive; the item refuses to merge
    None,
    /// Best candidates exist but none reciprocates
    NonMutual,
    /// Too heavy to initiate a merge; may still be pulled in
    Passive,
    /// Passive and nobody's best candidate this pass; frozen
    PassiveFixed,
    /// Passivity forced by breaking a request chain
    PassiveCFixed,
    /// A single best mutual candidate exists
    Single,
    /// Several best mutual candidates tie on max gain
    Multiple,
    /// Not computed yet
    Undefined,
}

impl Clusterable {
    /// Whether the item may start a merge group this pass.
    pub fn initiates(self) -> bool {
        matches!(self, Clusterable::Single | Clusterable::Multiple)
    }

    pub fn is_passive(self) -> bool {
        matches!(
            self,
            Clusterable::Passive | Clusterable::PassiveFixed | Clusterable::PassiveCFixed
        )
    }
}

/// Per-item clustering context, attached for the duration of one pass and
/// released at its end.
#[derive(Debug, Clone)]
pub(crate) struct Context {
    pub tag: Clusterable,

    /// Level-local indices of mutual candidates, ascending
    pub cands: Vec<u32>,

    /// Level-local indices of items that picked us one-way, ascending
    pub reqs: Vec<u32>,

    /// Total weight of the item: self-weight plus outgoing links
    pub weight: AccWeight,

    /// Sum of the positive link gains (complemented gain)
    pub cpg: AccWeight,

    /// Max link gain
    pub gmax: AccWeight,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            tag: Clusterable::Undefined,
            cands: Vec::new(),
            reqs: Vec::new(),
            weight: crate::types::ACCWEIGHT_NONE,
            cpg: crate::types::ACCWEIGHT_NONE,
            gmax: crate::types::ACCWEIGHT_NONE,
        }
    }
}
