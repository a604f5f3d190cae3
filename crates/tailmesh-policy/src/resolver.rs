//! expands alias tokens into concrete address sets.
//!
//! resolution is a live binding: the same policy resolves differently as
//! nodes come and go, so every pass resolves against its own snapshot.

use std::collections::BTreeSet;

use ipnet::IpNet;
use tailmesh_proto::PortRange;

use crate::alias::{Alias, Autogroup, DstAlias};
use crate::document::{Policy, Principal};
use crate::error::ResolutionError;
use crate::inventory::InventorySnapshot;
use crate::ipset::IpSet;

/// nested groups deeper than this are rejected. validation already
/// rules out cycles, this only bounds pathological documents.
pub const MAX_GROUP_DEPTH: usize = 32;

/// resolves aliases of one policy against one inventory snapshot.
#[derive(Debug, Clone, Copy)]
pub struct AliasResolver<'a> {
    policy: &'a Policy,
    inventory: &'a InventorySnapshot,
}

impl<'a> AliasResolver<'a> {
    pub fn new(policy: &'a Policy, inventory: &'a InventorySnapshot) -> Self {
        Self { policy, inventory }
    }

    /// the addresses an alias stands for right now.
    pub fn resolve(&self, alias: &Alias) -> Result<IpSet, ResolutionError> {
        let mut prefixes = Vec::new();
        self.collect(alias, &mut prefixes)?;
        Ok(IpSet::from_prefixes(prefixes))
    }

    /// the (prefix, ports) pairs a destination token opens.
    pub fn resolve_destination(
        &self,
        dst: &DstAlias,
    ) -> Result<Vec<(IpNet, PortRange)>, ResolutionError> {
        let set = self.resolve(&dst.alias)?;
        Ok(set
            .prefixes()
            .iter()
            .flat_map(|net| dst.ports.iter().map(move |ports| (*net, *ports)))
            .collect())
    }

    /// append the prefixes of `alias` to `out`, unaggregated.
    pub(crate) fn collect(
        &self,
        alias: &Alias,
        out: &mut Vec<IpNet>,
    ) -> Result<(), ResolutionError> {
        match alias {
            Alias::Wildcard => out.extend_from_slice(IpSet::any().prefixes()),
            Alias::Prefix(net) => {
                out.push(*net);
                // a single node address admits the node's other family too
                if net.prefix_len() == net.max_prefix_len()
                    && let Some(idx) = self.inventory.owner_of(&net.addr())
                {
                    self.push_nodes([idx], out);
                }
            }
            Alias::User(reference) => {
                self.push_nodes(self.inventory.nodes_of_user(reference), out);
            }
            Alias::Group(group) => {
                let mut users = BTreeSet::new();
                self.group_users(group, 0, &mut users)?;
                for user in users {
                    self.push_nodes(self.inventory.nodes_of_user(user), out);
                }
            }
            Alias::Tag(tag) => {
                self.push_nodes(self.inventory.nodes_with_tag(tag).iter().copied(), out);
            }
            Alias::Host(name) => {
                let net = self
                    .policy
                    .host(name)
                    .ok_or_else(|| ResolutionError::UnknownHost(name.clone()))?;
                self.collect(&Alias::Prefix(net), out)?;
            }
            Alias::Autogroup(Autogroup::Member) => {
                self.push_nodes(self.inventory.member_nodes(), out);
            }
            Alias::Autogroup(Autogroup::Tagged) => {
                self.push_nodes(self.inventory.tagged_nodes(), out);
            }
        }
        Ok(())
    }

    fn group_users(
        &self,
        group: &str,
        depth: usize,
        users: &mut BTreeSet<&'a str>,
    ) -> Result<(), ResolutionError> {
        if depth > MAX_GROUP_DEPTH {
            return Err(ResolutionError::GroupTooDeep(group.to_string()));
        }

        let members = self
            .policy
            .group(group)
            .ok_or_else(|| ResolutionError::UnknownGroup(group.to_string()))?;
        for member in members {
            match member {
                Principal::User(user) => {
                    users.insert(user.as_str());
                }
                Principal::Group(nested) => self.group_users(nested, depth + 1, users)?,
            }
        }
        Ok(())
    }

    fn push_nodes(&self, indices: impl IntoIterator<Item = usize>, out: &mut Vec<IpNet>) {
        let nodes = self.inventory.nodes();
        for idx in indices {
            out.extend(nodes[idx].ips().map(IpNet::from));
        }
    }
}
