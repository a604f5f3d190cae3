//! node inventory seam and an in-memory mirror implementing it.
//!
//! the registration layer owns nodes and users. the policy core only reads
//! them, through [`NodeInventory`], and learns about changes from the
//! [`NodeEvent`] stream.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};

use tailmesh_types::{Node, NodeId, User, UserId};

/// read-only access to the current nodes and users.
pub trait NodeInventory: Send + Sync {
    /// all registered nodes, expired ones included.
    fn list_nodes(&self) -> Vec<Node>;

    /// all users.
    fn list_users(&self) -> Vec<User>;

    /// mirrors that follow the event stream update themselves here.
    ///
    /// returns whether the event changed anything. providers backed by
    /// their own storage can leave this as is.
    fn apply_event(&self, event: &NodeEvent) -> bool {
        let _ = event;
        true
    }
}

/// a change in the node inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// a node joined.
    Added(Node),
    /// a node left.
    Removed(NodeId),
    /// a node's overlay addresses changed.
    AddressChanged {
        /// the node.
        id: NodeId,
        /// new ipv4 address.
        ipv4: Option<IpAddr>,
        /// new ipv6 address.
        ipv6: Option<IpAddr>,
    },
    /// anything else about a node changed (tags, expiry, hostname).
    Updated(Node),
}

impl NodeEvent {
    /// the node the event is about.
    pub fn node_id(&self) -> NodeId {
        match self {
            NodeEvent::Added(node) | NodeEvent::Updated(node) => node.id(),
            NodeEvent::Removed(id) | NodeEvent::AddressChanged { id, .. } => *id,
        }
    }

    /// short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeEvent::Added(_) => "added",
            NodeEvent::Removed(_) => "removed",
            NodeEvent::AddressChanged { .. } => "address_changed",
            NodeEvent::Updated(_) => "updated",
        }
    }
}

/// in-memory inventory with copy-on-write semantics.
///
/// readers clone an `Arc` of the current map and never wait on writers
/// for longer than the pointer swap.
#[derive(Debug, Default)]
pub struct NodeStore {
    nodes: RwLock<Arc<HashMap<NodeId, Node>>>,
    users: RwLock<Arc<HashMap<UserId, User>>>,
}

impl NodeStore {
    /// create a store holding `nodes` and `users`.
    pub fn new(nodes: Vec<Node>, users: Vec<User>) -> Self {
        Self {
            nodes: RwLock::new(Arc::new(nodes.into_iter().map(|n| (n.id(), n)).collect())),
            users: RwLock::new(Arc::new(users.into_iter().map(|u| (u.id, u)).collect())),
        }
    }

    /// get a node by id.
    pub fn get(&self, id: NodeId) -> Option<Node> {
        self.nodes_snapshot().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.nodes_snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes_snapshot().is_empty()
    }

    /// insert or replace a node.
    ///
    /// returns whether the stored node changed.
    pub fn upsert(&self, node: Node) -> bool {
        self.modify_nodes(|nodes| {
            let changed = nodes.get(&node.id()) != Some(&node);
            nodes.insert(node.id(), node);
            changed
        })
    }

    /// remove a node, returning it if it was present.
    pub fn remove(&self, id: NodeId) -> Option<Node> {
        let mut removed = None;
        self.modify_nodes(|nodes| {
            removed = nodes.remove(&id);
            removed.is_some()
        });
        removed
    }

    /// replace a node's overlay addresses.
    ///
    /// returns false when the node is unknown or already had them.
    pub fn set_addresses(&self, id: NodeId, ipv4: Option<IpAddr>, ipv6: Option<IpAddr>) -> bool {
        self.modify_nodes(|nodes| match nodes.get_mut(&id) {
            Some(node) if node.ipv4() != ipv4 || node.ipv6() != ipv6 => {
                node.set_ipv4(ipv4);
                node.set_ipv6(ipv6);
                true
            }
            _ => false,
        })
    }

    /// insert or replace a user.
    pub fn upsert_user(&self, user: User) {
        let mut guard = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let mut users = (**guard).clone();
        users.insert(user.id, user);
        *guard = Arc::new(users);
    }

    fn nodes_snapshot(&self) -> Arc<HashMap<NodeId, Node>> {
        Arc::clone(&self.nodes.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// copy-on-write update: the closure edits a private copy which is
    /// swapped in only when it reports a change.
    fn modify_nodes(&self, f: impl FnOnce(&mut HashMap<NodeId, Node>) -> bool) -> bool {
        let mut guard = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let mut nodes = (**guard).clone();
        let changed = f(&mut nodes);
        if changed {
            *guard = Arc::new(nodes);
        }
        changed
    }
}

impl NodeInventory for NodeStore {
    fn list_nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes_snapshot().values().cloned().collect();
        nodes.sort_by_key(Node::id);
        nodes
    }

    fn list_users(&self) -> Vec<User> {
        let users = Arc::clone(&self.users.read().unwrap_or_else(PoisonError::into_inner));
        let mut users: Vec<User> = users.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        users
    }

    fn apply_event(&self, event: &NodeEvent) -> bool {
        match event {
            NodeEvent::Added(node) | NodeEvent::Updated(node) => self.upsert(node.clone()),
            NodeEvent::Removed(id) => self.remove(*id).is_some(),
            NodeEvent::AddressChanged { id, ipv4, ipv6 } => self.set_addresses(*id, *ipv4, *ipv6),
        }
    }
}
