//! Domain errors raised by the graph builder and the clustering engine

use thiserror::Error;

use crate::types::Id;

/// An invariant violation on the caller's side, fatal for the current run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// The graph was finalized and can no longer be extended.
    #[error("finalized graph cannot be extended")]
    Finalized,

    /// A node with this id already exists.
    #[error("duplicate node id #{id}")]
    DuplicateNode { id: Id },

    /// A link references a node that was never added.
    #[error("link references unknown node #{id}")]
    UnknownNode { id: Id },

    /// `add_node_range` called with end < begin.
    #[error("reversed node id range {beg}..{end}")]
    ReversedRange { beg: Id, end: Id },

    /// The self-weight of a node can be assigned only once.
    #[error("self-weight of node #{id} is already assigned")]
    SelfWeightReassigned { id: Id },

    /// Signed link weights are not supported.
    #[error("negative weight {weight} on link to node #{id}")]
    NegativeWeight { id: Id, weight: f32 },

    /// A self-reference was found stored in a link sequence.
    #[error("self-link stored in the link sequence of item #{id}")]
    SelfLinkEntry { id: Id },

    /// Link weights do not mirror although the graph was declared symmetric.
    #[error("asymmetric link {src}->{dst} in a graph declared symmetric")]
    AsymmetricLink { src: Id, dst: Id },
}
