//! core types for tailmesh - the policy and network-map core of a mesh
//! coordination server.
//!
//! this crate provides the data structures shared by every other crate:
//! - [`Node`]: a member of the mesh, as seen in an inventory snapshot
//! - [`User`]: owner of user-owned nodes
//! - [`Tag`]: validated `tag:` identity for tagged nodes
//! - [`PolicyVersion`]: version of the active compiled policy
//! - [`PolicyJson`]: size-limited policy text
//! - [`Config`]: application configuration

mod config;
mod node;
mod policy_json;
mod tag;
mod user;
mod version;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{Config, DefaultPolicy, DistributionConfig, LoggingConfig};
pub use node::{Node, NodeBuilder, NodeId};
pub use policy_json::{MAX_POLICY_SIZE, PolicyJson, PolicyJsonError};
pub use tag::{MAX_TAG_NAME_LEN, MAX_TAGS, Tag, TagError};
pub use user::{User, UserId};
pub use version::{Generation, PolicyVersion};
