//! aggregated sets of ip prefixes.

use std::net::IpAddr;

use ipnet::IpNet;

/// a set of addresses stored as a minimal, sorted list of prefixes.
///
/// adjacent and contained prefixes are collapsed on construction, so two
/// sets cover the same addresses iff they compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IpSet {
    prefixes: Vec<IpNet>,
}

impl IpSet {
    /// the empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// every ipv4 and ipv6 address.
    pub fn any() -> Self {
        Self::from_prefixes([
            IpNet::V4(Default::default()),
            IpNet::V6(Default::default()),
        ])
    }

    /// build a set from arbitrary, possibly overlapping prefixes.
    pub fn from_prefixes(prefixes: impl IntoIterator<Item = IpNet>) -> Self {
        let prefixes: Vec<IpNet> = prefixes.into_iter().collect();
        Self {
            prefixes: IpNet::aggregate(&prefixes),
        }
    }

    /// the aggregated prefixes, ipv4 first, each family in address order.
    pub fn prefixes(&self) -> &[IpNet] {
        &self.prefixes
    }

    /// whether the set covers no address.
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// whether the set covers both whole address families.
    pub fn is_any(&self) -> bool {
        self.prefixes.len() == 2 && self.prefixes.iter().all(|p| p.prefix_len() == 0)
    }

    /// whether `ip` is covered.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.prefixes.iter().any(|p| p.contains(ip))
    }

    /// the union of two sets.
    pub fn union(&self, other: &IpSet) -> IpSet {
        Self::from_prefixes(self.prefixes.iter().chain(&other.prefixes).copied())
    }

    /// prefixes rendered as strings, as the wire format expects.
    pub fn to_strings(&self) -> Vec<String> {
        self.prefixes.iter().map(ToString::to_string).collect()
    }
}

impl FromIterator<IpNet> for IpSet {
    fn from_iter<I: IntoIterator<Item = IpNet>>(iter: I) -> Self {
        Self::from_prefixes(iter)
    }
}
