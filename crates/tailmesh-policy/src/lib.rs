//! access policy for the mesh: from an operator-written document to one
//! network map per node.
//!
//! the pipeline is pure:
//! 1. [`PolicyDocument`] is parsed and validated into a [`Policy`]
//! 2. [`AliasResolver`] expands users, groups, tags, hosts and autogroups
//!    against an [`InventorySnapshot`]
//! 3. [`compile`] produces the global, deduplicated [`CompiledPolicy`]
//! 4. [`NetMapBuilder`] intersects it with the inventory, giving every node
//!    its peers and the grants each peer holds towards it
//!
//! rules are accept-only and accumulate; no entry ever removes access
//! another entry grants.

pub mod alias;
pub mod compiler;
pub mod document;
pub mod error;
pub mod inventory;
pub mod ipset;
pub mod netmap;
pub mod ports;
pub mod resolver;

pub use alias::{Alias, Autogroup, DstAlias};
pub use compiler::{CompiledPolicy, CompiledRule, Destination, compile};
pub use document::{AclEntry, Definitions, HostAliases, Memberships, Policy, PolicyDocument, Principal};
pub use error::{CompileError, Error, ParseError, ResolutionError, Result, ValidationError};
pub use inventory::InventorySnapshot;
pub use ipset::IpSet;
pub use netmap::{NetMapBuilder, NetMapSet, NetworkMap, Peer, PeerGrant};
pub use resolver::AliasResolver;

/// validate `document`, compile it against `inventory` and build every
/// node's map in one go.
pub fn build_netmaps(
    document: &PolicyDocument,
    inventory: &InventorySnapshot,
    version: tailmesh_types::PolicyVersion,
) -> Result<NetMapSet> {
    let policy = document.validate()?;
    let compiled = compile(&policy, inventory)?;
    Ok(NetMapBuilder::new(&compiled, inventory).build(version))
}
