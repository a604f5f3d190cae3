//! node type representing a member of the mesh.
//!
//! nodes are created and destroyed by the registration layer; the policy
//! core only ever reads them from an inventory snapshot.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tag::Tag;
use crate::user::UserId;

/// unique identifier for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// get the raw u64 value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// a node in the inventory.
///
/// nodes are either:
/// - **user-owned**: belong to a specific user, no tags
/// - **tagged**: identity defined by tags, not user ownership
///
/// tags and user ownership are mutually exclusive for policy purposes: a
/// tagged node never matches a user reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) ipv4: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) ipv6: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) expiry: Option<DateTime<Utc>>,
}

/// builder for constructing Node values.
///
/// only the id and hostname are required.
pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    pub fn new(id: NodeId, hostname: impl Into<String>) -> Self {
        Self {
            node: Node {
                id,
                hostname: hostname.into(),
                user_id: None,
                ipv4: None,
                ipv6: None,
                tags: vec![],
                expiry: None,
            },
        }
    }

    pub fn user_id(mut self, id: UserId) -> Self {
        self.node.user_id = Some(id);
        self
    }

    pub fn ipv4(mut self, ip: IpAddr) -> Self {
        self.node.ipv4 = Some(ip);
        self
    }

    pub fn ipv6(mut self, ip: IpAddr) -> Self {
        self.node.ipv6 = Some(ip);
        self
    }

    pub fn tags(mut self, tags: Vec<Tag>) -> Self {
        self.node.tags = tags;
        self
    }

    pub fn expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.node.expiry = Some(expiry);
        self
    }

    pub fn build(self) -> Node {
        self.node
    }
}

impl Node {
    pub fn builder(id: NodeId, hostname: impl Into<String>) -> NodeBuilder {
        NodeBuilder::new(id, hostname)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn ipv4(&self) -> Option<IpAddr> {
        self.ipv4
    }

    pub fn ipv6(&self) -> Option<IpAddr> {
        self.ipv6
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    pub fn set_ipv4(&mut self, ip: Option<IpAddr>) {
        self.ipv4 = ip;
    }

    pub fn set_ipv6(&mut self, ip: Option<IpAddr>) {
        self.ipv6 = ip;
    }

    pub fn set_tags(&mut self, tags: Vec<Tag>) {
        self.tags = tags;
    }

    pub fn set_expiry(&mut self, expiry: Option<DateTime<Utc>>) {
        self.expiry = expiry;
    }

    /// returns whether the node registration has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| now > expiry)
    }

    /// returns whether this is a tagged node.
    pub fn is_tagged(&self) -> bool {
        !self.tags.is_empty()
    }

    /// returns all overlay addresses assigned to this node, ipv4 first.
    pub fn ips(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.ipv4.into_iter().chain(self.ipv6)
    }
}
