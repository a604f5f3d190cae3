//! compiles a validated policy into address-level filter rules.

use std::collections::{BTreeMap, HashSet};

use ipnet::IpNet;
use tailmesh_proto::{FilterRule, NetPortRange, PortRange};

use crate::document::Policy;
use crate::error::{CompileError, Error};
use crate::inventory::InventorySnapshot;
use crate::ipset::IpSet;
use crate::resolver::AliasResolver;

/// a destination prefix and one port range open on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Destination {
    /// destination prefix.
    pub prefix: IpNet,
    /// inclusive port range.
    pub ports: PortRange,
}

/// traffic from any address in `sources` to any of `destinations` is
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRule {
    /// index of the acl entry this rule was expanded from.
    pub entry: usize,
    /// aggregated source addresses.
    pub sources: IpSet,
    /// destinations sorted by port range, prefixes aggregated per range.
    pub destinations: Vec<Destination>,
}

/// the global rule set of one policy against one inventory snapshot.
///
/// accept-only: traffic no rule matches is denied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledPolicy {
    rules: Vec<CompiledRule>,
}

impl CompiledPolicy {
    /// rules in acl order.
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// render the global rule set in wire form.
    pub fn to_filter_rules(&self) -> Vec<FilterRule> {
        self.rules
            .iter()
            .map(|rule| FilterRule {
                src_ips: rule.sources.to_strings(),
                dst_ports: rule
                    .destinations
                    .iter()
                    .map(|dst| NetPortRange {
                        ip: dst.prefix.to_string(),
                        ports: dst.ports,
                    })
                    .collect(),
            })
            .collect()
    }
}

/// expand every acl entry of `policy` against `inventory`.
///
/// entries whose sources or destinations currently match nothing produce
/// no rule. rules identical in both sources and destinations are emitted
/// once. any resolution failure aborts the whole compilation.
pub fn compile(policy: &Policy, inventory: &InventorySnapshot) -> Result<CompiledPolicy, Error> {
    let resolver = AliasResolver::new(policy, inventory);
    let mut rules = Vec::with_capacity(policy.acls().len());
    let mut seen = HashSet::new();

    for acl in policy.acls() {
        let index = acl.index;

        let mut prefixes = Vec::new();
        for alias in &acl.sources {
            resolver
                .collect(alias, &mut prefixes)
                .map_err(|source| Error::Resolution {
                    index,
                    token: alias.to_string(),
                    source,
                })?;
        }
        let sources = IpSet::from_prefixes(prefixes);

        let mut by_ports: BTreeMap<PortRange, Vec<IpNet>> = BTreeMap::new();
        for dst in &acl.destinations {
            let mut prefixes = Vec::new();
            resolver
                .collect(&dst.alias, &mut prefixes)
                .map_err(|source| Error::Resolution {
                    index,
                    token: dst.to_string(),
                    source,
                })?;
            if prefixes.is_empty() {
                continue;
            }

            for ports in &dst.ports {
                if ports.first > ports.last {
                    return Err(CompileError::InvertedPortRange {
                        index,
                        first: ports.first,
                        last: ports.last,
                    }
                    .into());
                }
                by_ports
                    .entry(*ports)
                    .or_default()
                    .extend_from_slice(&prefixes);
            }
        }

        let destinations: Vec<Destination> = by_ports
            .into_iter()
            .flat_map(|(ports, prefixes)| {
                IpSet::from_prefixes(prefixes)
                    .prefixes()
                    .iter()
                    .map(|prefix| Destination {
                        prefix: *prefix,
                        ports,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        if sources.is_empty() || destinations.is_empty() {
            continue;
        }
        if !seen.insert((sources.clone(), destinations.clone())) {
            continue;
        }

        rules.push(CompiledRule {
            entry: index,
            sources,
            destinations,
        });
    }

    Ok(CompiledPolicy { rules })
}
