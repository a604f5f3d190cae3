//! error types for tailmesh-state.

use tailmesh_types::NodeId;
use thiserror::Error;

/// errors surfaced by the policy store and coordinator.
#[derive(Debug, Error)]
pub enum Error {
    /// the candidate policy was rejected; the active one is unchanged.
    #[error(transparent)]
    Policy(#[from] tailmesh_policy::Error),

    /// no live or expired node with this id is in the inventory.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// the blocking worker computing maps panicked or was cancelled.
    #[error("map computation worker failed: {0}")]
    Worker(String),
}

/// a map could not be handed to the session layer.
#[derive(Debug, Error)]
#[error("failed to deliver map to node {node}: {reason}")]
pub struct SinkError {
    /// target node.
    pub node: NodeId,
    /// why delivery failed.
    pub reason: String,
}

/// result type for tailmesh-state operations.
pub type Result<T> = std::result::Result<T, Error>;
