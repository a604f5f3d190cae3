//! per-node network maps derived from a compiled policy.
//!
//! a node's map lists every peer it should keep a session with. if A may
//! reach B, then B appears in A's peers (so A can initiate) and A appears
//! in B's peers (so replies can flow back), even when B gets no grant
//! towards A.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use tailmesh_proto::{FilterRule, MapPeer, MapUpdate, NetPortRange, PortRange};
use tailmesh_types::{Generation, Node, NodeId, PolicyVersion};

use crate::compiler::{CompiledPolicy, Destination};
use crate::inventory::InventorySnapshot;

/// what one rule lets a peer do towards the map's node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerGrant {
    /// acl entry the rule was expanded from.
    pub entry: usize,
    /// the peer's addresses the rule admits as source.
    pub sources: Vec<IpAddr>,
    /// the map node's addresses and ports the rule opens.
    pub destinations: Vec<Destination>,
}

/// a peer in a node's network map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub node_id: NodeId,
    pub hostname: String,
    /// overlay addresses, ipv4 first.
    pub addresses: Vec<IpAddr>,
    pub tags: Vec<String>,
    /// empty when the peer is only visible for return traffic.
    pub grants: Vec<PeerGrant>,
}

impl Peer {
    fn from_node(node: &Node, grants: Vec<PeerGrant>) -> Self {
        Self {
            node_id: node.id(),
            hostname: node.hostname().to_string(),
            addresses: node.ips().collect(),
            tags: node.tags().iter().map(|t| t.to_string()).collect(),
            grants,
        }
    }

    /// whether the peer may open connections to the map's node.
    pub fn can_initiate(&self) -> bool {
        !self.grants.is_empty()
    }

    /// every port the peer may reach, merged across rules.
    pub fn allowed_ports(&self) -> Vec<PortRange> {
        PortRange::merge(
            self.grants
                .iter()
                .flat_map(|g| g.destinations.iter().map(|d| d.ports))
                .collect(),
        )
    }

    /// whether the peer may reach `port` on the map node's address `dst`.
    pub fn allows(&self, dst: IpAddr, port: u16) -> bool {
        self.grants
            .iter()
            .flat_map(|g| &g.destinations)
            .any(|d| d.prefix.contains(&dst) && d.ports.contains(port))
    }
}

/// one node's view of the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMap {
    node_id: NodeId,
    policy_version: PolicyVersion,
    generation: Generation,
    peers: Vec<Peer>,
}

impl NetworkMap {
    /// a map with no peers, for nodes that are unknown to the policy pass
    /// (for example expired ones).
    pub fn empty(node_id: NodeId, policy_version: PolicyVersion, generation: Generation) -> Self {
        Self {
            node_id,
            policy_version,
            generation,
            peers: Vec::new(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn policy_version(&self) -> PolicyVersion {
        self.policy_version
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// peers sorted by node id.
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn peer(&self, id: NodeId) -> Option<&Peer> {
        self.peers
            .binary_search_by_key(&id, |p| p.node_id)
            .ok()
            .map(|idx| &self.peers[idx])
    }

    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.peers.iter().map(|p| p.node_id).collect()
    }

    /// whether two maps give the node the same view, ignoring the version
    /// counters they were built at.
    pub fn same_view(&self, other: &NetworkMap) -> bool {
        self.node_id == other.node_id && self.peers == other.peers
    }

    /// inbound packet filter the node enforces: one rule per (peer, grant).
    pub fn packet_filter(&self) -> Vec<FilterRule> {
        self.peers
            .iter()
            .flat_map(|peer| &peer.grants)
            .map(|grant| FilterRule {
                src_ips: grant
                    .sources
                    .iter()
                    .map(|ip| IpNet::from(*ip).to_string())
                    .collect(),
                dst_ports: grant
                    .destinations
                    .iter()
                    .map(|d| NetPortRange {
                        ip: d.prefix.to_string(),
                        ports: d.ports,
                    })
                    .collect(),
            })
            .collect()
    }

    /// the payload the session layer pushes to the node.
    pub fn to_update(&self) -> MapUpdate {
        MapUpdate {
            node_id: self.node_id,
            policy_version: self.policy_version,
            generation: self.generation,
            peers: self
                .peers
                .iter()
                .map(|p| MapPeer {
                    id: p.node_id,
                    name: p.hostname.clone(),
                    addresses: p
                        .addresses
                        .iter()
                        .map(|ip| IpNet::from(*ip).to_string())
                        .collect(),
                    tags: p.tags.clone(),
                })
                .collect(),
            packet_filter: self.packet_filter(),
        }
    }
}

/// the maps of every live node, built in one pass.
#[derive(Debug, Clone, Default)]
pub struct NetMapSet {
    policy_version: PolicyVersion,
    generation: Generation,
    maps: BTreeMap<NodeId, Arc<NetworkMap>>,
    next_expiry: Option<DateTime<Utc>>,
}

impl NetMapSet {
    pub fn get(&self, id: NodeId) -> Option<&Arc<NetworkMap>> {
        self.maps.get(&id)
    }

    pub fn policy_version(&self) -> PolicyVersion {
        self.policy_version
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// when the earliest node in the set expires. the set is outdated
    /// from then on even if nothing else changes.
    pub fn next_expiry(&self) -> Option<DateTime<Utc>> {
        self.next_expiry
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// maps ordered by node id.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Arc<NetworkMap>)> {
        self.maps.iter().map(|(id, map)| (*id, map))
    }

    /// nodes whose view differs from `previous` (or that had no map).
    pub fn changed_since(&self, previous: &NetMapSet) -> Vec<NodeId> {
        self.maps
            .iter()
            .filter(|(id, map)| {
                previous
                    .maps
                    .get(*id)
                    .is_none_or(|old| !old.same_view(map))
            })
            .map(|(id, _)| *id)
            .collect()
    }
}

/// sorted address to node lookup, searched by prefix range.
struct AddressIndex {
    v4: Vec<(u32, usize)>,
    v6: Vec<(u128, usize)>,
}

impl AddressIndex {
    fn new(nodes: &[Node]) -> Self {
        let mut v4 = Vec::with_capacity(nodes.len());
        let mut v6 = Vec::with_capacity(nodes.len());
        for (idx, node) in nodes.iter().enumerate() {
            for ip in node.ips() {
                match ip {
                    IpAddr::V4(ip) => v4.push((u32::from(ip), idx)),
                    IpAddr::V6(ip) => v6.push((u128::from(ip), idx)),
                }
            }
        }
        v4.sort_unstable();
        v6.sort_unstable();
        Self { v4, v6 }
    }

    /// call `f` for every node address inside `net`.
    fn for_each_in(&self, net: &IpNet, mut f: impl FnMut(usize, IpAddr)) {
        match net {
            IpNet::V4(net) => {
                let (lo, hi) = (u32::from(net.network()), u32::from(net.broadcast()));
                let start = self.v4.partition_point(|(addr, _)| *addr < lo);
                for (addr, idx) in self.v4[start..].iter().take_while(|(a, _)| *a <= hi) {
                    f(*idx, IpAddr::from(addr.to_be_bytes()));
                }
            }
            IpNet::V6(net) => {
                let (lo, hi) = (u128::from(net.network()), u128::from(net.broadcast()));
                let start = self.v6.partition_point(|(addr, _)| *addr < lo);
                for (addr, idx) in self.v6[start..].iter().take_while(|(a, _)| *a <= hi) {
                    f(*idx, IpAddr::from(addr.to_be_bytes()));
                }
            }
        }
    }
}

/// intersects a compiled policy with the inventory it was compiled from.
pub struct NetMapBuilder<'a> {
    compiled: &'a CompiledPolicy,
    inventory: &'a InventorySnapshot,
}

impl<'a> NetMapBuilder<'a> {
    pub fn new(compiled: &'a CompiledPolicy, inventory: &'a InventorySnapshot) -> Self {
        Self {
            compiled,
            inventory,
        }
    }

    /// build every live node's map.
    pub fn build(&self, policy_version: PolicyVersion) -> NetMapSet {
        let nodes = self.inventory.nodes();
        let index = AddressIndex::new(nodes);

        // per target node: peer index -> grants the peer holds towards it
        let mut grants: Vec<BTreeMap<usize, Vec<PeerGrant>>> = vec![BTreeMap::new(); nodes.len()];
        let mut visible: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];

        for rule in self.compiled.rules() {
            let mut sources: BTreeMap<usize, Vec<IpAddr>> = BTreeMap::new();
            for net in rule.sources.prefixes() {
                index.for_each_in(net, |idx, ip| sources.entry(idx).or_default().push(ip));
            }
            if sources.is_empty() {
                continue;
            }

            let mut targets: BTreeMap<usize, Vec<Destination>> = BTreeMap::new();
            for dst in &rule.destinations {
                index.for_each_in(&dst.prefix, |idx, ip| {
                    targets.entry(idx).or_default().push(Destination {
                        prefix: IpNet::from(ip),
                        ports: dst.ports,
                    });
                });
            }

            for (&dst, destinations) in &targets {
                for (&src, addresses) in &sources {
                    if src == dst {
                        continue;
                    }
                    grants[dst].entry(src).or_default().push(PeerGrant {
                        entry: rule.entry,
                        sources: addresses.clone(),
                        destinations: destinations.clone(),
                    });
                    visible[src].insert(dst);
                    visible[dst].insert(src);
                }
            }
        }

        let generation = self.inventory.generation();
        let maps = nodes
            .iter()
            .zip(visible)
            .zip(grants)
            .map(|((node, peers), mut held)| {
                let peers = peers
                    .into_iter()
                    .map(|idx| Peer::from_node(&nodes[idx], held.remove(&idx).unwrap_or_default()))
                    .collect();
                let map = NetworkMap {
                    node_id: node.id(),
                    policy_version,
                    generation,
                    peers,
                };
                (node.id(), Arc::new(map))
            })
            .collect();

        NetMapSet {
            policy_version,
            generation,
            maps,
            next_expiry: self.inventory.next_expiry(),
        }
    }
}
