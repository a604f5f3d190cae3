//! wire types for map distribution.
//!
//! this crate holds the shapes the session layer pushes to nodes:
//! - [`FilterRule`] / [`NetPortRange`] / [`PortRange`]: the packet filter
//!   a node enforces for inbound traffic
//! - [`MapPeer`] / [`MapUpdate`]: one node's view of its peers

#![warn(missing_docs)]

mod map;

pub use map::{FilterRule, MapPeer, MapUpdate, NetPortRange, PortRange};
