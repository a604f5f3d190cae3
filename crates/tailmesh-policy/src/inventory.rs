//! immutable view of the node inventory that one compilation pass reads.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use tailmesh_types::{Generation, Node, NodeId, Tag, User, UserId};

/// the nodes and users a pass resolves aliases against.
///
/// expired nodes are dropped on construction: they neither reach nor are
/// reached. nodes are kept sorted by id, so positions double as a stable
/// ordering for peer lists.
#[derive(Debug, Clone, Default)]
pub struct InventorySnapshot {
    nodes: Vec<Node>,
    users: Vec<User>,
    generation: Generation,
    by_user: HashMap<UserId, Vec<usize>>,
    by_tag: HashMap<Tag, Vec<usize>>,
    by_ip: HashMap<IpAddr, usize>,
}

impl InventorySnapshot {
    /// snapshot `nodes` and `users` as of now.
    pub fn new(nodes: Vec<Node>, users: Vec<User>, generation: Generation) -> Self {
        Self::at(nodes, users, generation, Utc::now())
    }

    /// snapshot as of `now`, which decides node expiry.
    pub fn at(
        nodes: Vec<Node>,
        mut users: Vec<User>,
        generation: Generation,
        now: DateTime<Utc>,
    ) -> Self {
        let mut nodes: Vec<Node> = nodes.into_iter().filter(|n| !n.is_expired_at(now)).collect();
        nodes.sort_by_key(Node::id);
        nodes.dedup_by_key(|n| n.id());
        users.sort_by_key(|u| u.id);

        let mut by_user: HashMap<UserId, Vec<usize>> = HashMap::new();
        let mut by_tag: HashMap<Tag, Vec<usize>> = HashMap::new();
        let mut by_ip = HashMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            if let Some(user) = node.user_id()
                && !node.is_tagged()
            {
                by_user.entry(user).or_default().push(idx);
            }
            for tag in node.tags() {
                by_tag.entry(tag.clone()).or_default().push(idx);
            }
            for ip in node.ips() {
                by_ip.insert(ip, idx);
            }
        }

        Self {
            nodes,
            users,
            generation,
            by_user,
            by_tag,
            by_ip,
        }
    }

    /// live nodes, sorted by id.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// all users, sorted by id.
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// generation the snapshot was taken at.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// earliest expiry among live nodes.
    pub fn next_expiry(&self) -> Option<DateTime<Utc>> {
        self.nodes.iter().filter_map(Node::expiry).min()
    }

    /// look up a live node.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.position(id).map(|idx| &self.nodes[idx])
    }

    /// index of a live node in [`InventorySnapshot::nodes`].
    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.nodes.binary_search_by_key(&id, Node::id).ok()
    }

    /// indices of nodes owned by users matching a `name@` or `name@domain`
    /// reference. tagged nodes never match.
    pub(crate) fn nodes_of_user<'a>(
        &'a self,
        reference: &'a str,
    ) -> impl Iterator<Item = usize> + 'a {
        self.users
            .iter()
            .filter(move |u| u.matches_reference(reference))
            .filter_map(|u| self.by_user.get(&u.id))
            .flatten()
            .copied()
    }

    /// indices of nodes carrying `tag`.
    pub(crate) fn nodes_with_tag(&self, tag: &Tag) -> &[usize] {
        self.by_tag.get(tag).map(Vec::as_slice).unwrap_or_default()
    }

    /// indices of user-owned nodes.
    pub(crate) fn member_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        self.by_user.values().flatten().copied()
    }

    /// indices of tagged nodes.
    pub(crate) fn tagged_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_tagged())
            .map(|(idx, _)| idx)
    }

    /// index of the node owning `ip`.
    pub(crate) fn owner_of(&self, ip: &IpAddr) -> Option<usize> {
        self.by_ip.get(ip).copied()
    }
}
