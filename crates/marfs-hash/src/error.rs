//! Error types for ring construction.

use thiserror::Error;

/// Result type alias for ring operations.
pub type RingResult<T> = Result<T, RingError>;

/// Failures while building a consistent-hash ring.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    /// A node carries a negative weight.
    #[error("node '{node}' has negative weight {weight}")]
    InvalidWeight {
        /// Name of the offending node.
        node: String,
        /// The rejected weight.
        weight: i64,
    },

    /// Every node has zero weight, which leaves a placement ring with no positions.
    #[error("all node weights are zero for a placement ring")]
    DegenerateInput,

    /// The node list produced no virtual nodes at all.
    #[error("ring has no virtual nodes")]
    EmptyRing,

    /// Weights are so large that the virtual-node array cannot be allocated.
    #[error("ring would require {count} virtual nodes")]
    TooManyVirtualNodes {
        /// Requested virtual-node count.
        count: u64,
    },
}
