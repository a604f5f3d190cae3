//! runtime state for the tailmesh policy core.
//!
//! - [`PolicyStore`]: the active policy, hot-swapped with `arc-swap`
//! - [`NodeStore`]: copy-on-write inventory mirror behind [`NodeInventory`]
//! - [`BroadcastSink`]: fans map updates out to session handlers
//! - [`Coordinator`]: reloads policies, follows inventory changes and keeps
//!   every node's map current

mod coordinator;
mod error;
mod inventory;
mod sink;
mod store;

pub use coordinator::{Coordinator, RecomputeOutcome};
pub use error::{Error, Result, SinkError};
pub use inventory::{NodeEvent, NodeInventory, NodeStore};
pub use sink::{BroadcastSink, MapEvent, MapSink};
pub use store::{
    ActivePolicy, PolicyStore, SetPolicyOutcome, StoreState, UpdateGuard, default_document,
};
