//! packet filter and map update payloads.
//!
//! field names follow the tailscale client's json (pascalcase, with the
//! `SrcIPs` / `IP` spellings) so payloads can be forwarded unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};
use tailmesh_types::{Generation, NodeId, PolicyVersion};

/// an inclusive port range.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "PascalCase")]
pub struct PortRange {
    /// first port in range.
    pub first: u16,
    /// last port in range (inclusive).
    pub last: u16,
}

impl PortRange {
    /// create a port range for a single port.
    pub const fn single(port: u16) -> Self {
        Self {
            first: port,
            last: port,
        }
    }

    /// create a port range for all ports.
    pub const fn any() -> Self {
        Self {
            first: 0,
            last: u16::MAX,
        }
    }

    /// whether `port` falls inside the range.
    pub fn contains(&self, port: u16) -> bool {
        self.first <= port && port <= self.last
    }

    /// whether this range covers every port.
    pub fn is_any(&self) -> bool {
        *self == Self::any()
    }

    /// merge overlapping or adjacent ranges into a sorted minimal list.
    pub fn merge(mut ranges: Vec<PortRange>) -> Vec<PortRange> {
        ranges.sort();
        let mut merged: Vec<PortRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if u32::from(range.first) <= u32::from(last.last) + 1 => {
                    last.last = last.last.max(range.last);
                }
                _ => merged.push(range),
            }
        }
        merged
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            f.write_str("*")
        } else if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}-{}", self.first, self.last)
        }
    }
}

/// a destination prefix and the ports open on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetPortRange {
    /// destination cidr.
    #[serde(rename = "IP")]
    pub ip: String,

    /// port range.
    pub ports: PortRange,
}

/// a packet filter rule: traffic from any of `src_ips` to any of
/// `dst_ports` is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct FilterRule {
    /// source cidrs.
    #[serde(rename = "SrcIPs")]
    pub src_ips: Vec<String>,

    /// destination port ranges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dst_ports: Vec<NetPortRange>,
}

/// a peer as rendered for a node's map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapPeer {
    /// node id.
    #[serde(rename = "ID")]
    pub id: NodeId,

    /// node hostname.
    pub name: String,

    /// overlay addresses as host prefixes.
    pub addresses: Vec<String>,

    /// tags on the peer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// everything the session layer pushes to one node after a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapUpdate {
    /// target node.
    pub node_id: NodeId,

    /// policy version the map was derived from.
    pub policy_version: PolicyVersion,

    /// inventory generation the map was derived from.
    pub generation: Generation,

    /// peers the node should establish sessions with.
    pub peers: Vec<MapPeer>,

    /// inbound filter the node enforces.
    pub packet_filter: Vec<FilterRule>,
}
