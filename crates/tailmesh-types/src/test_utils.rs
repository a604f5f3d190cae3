//! test utilities for building nodes and users without spelling out
//! every field.

use std::net::IpAddr;

use crate::{Node, NodeId, Tag, User, UserId};

/// builder for test [`Node`] instances.
///
/// addresses default to `100.64.0.<id>` and `fd7a:115c:a1e0::<id>`, which
/// mirrors how the coordination server allocates them.
///
/// # example
/// ```
/// use tailmesh_types::test_utils::TestNodeBuilder;
///
/// let node = TestNodeBuilder::new(1).with_user(1).build();
/// let tagged = TestNodeBuilder::new(2).with_tag("tag:server").build();
/// assert!(tagged.is_tagged());
/// ```
#[derive(Debug, Clone)]
pub struct TestNodeBuilder {
    id: u64,
    user_id: Option<UserId>,
    tags: Vec<Tag>,
    hostname: Option<String>,
    ipv4: Option<Option<IpAddr>>,
    ipv6: Option<Option<IpAddr>>,
}

impl TestNodeBuilder {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            user_id: None,
            tags: vec![],
            hostname: None,
            ipv4: None,
            ipv6: None,
        }
    }

    /// set the owning user.
    pub fn with_user(mut self, user_id: u64) -> Self {
        self.user_id = Some(UserId(user_id));
        self
    }

    /// add a tag; panics on an invalid tag since this is test-only.
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.parse().expect("valid test tag"));
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_ipv4(mut self, ip: &str) -> Self {
        self.ipv4 = Some(Some(ip.parse().expect("valid test ipv4")));
        self
    }

    pub fn with_ipv6(mut self, ip: &str) -> Self {
        self.ipv6 = Some(Some(ip.parse().expect("valid test ipv6")));
        self
    }

    /// drop the default ipv6 address.
    pub fn ipv4_only(mut self) -> Self {
        self.ipv6 = Some(None);
        self
    }

    pub fn build(self) -> Node {
        let ipv4 = self.ipv4.unwrap_or_else(|| {
            Some(IpAddr::from([100, 64, (self.id >> 8) as u8, self.id as u8]))
        });
        let ipv6 = self.ipv6.unwrap_or_else(|| {
            Some(
                format!("fd7a:115c:a1e0::{:x}", self.id)
                    .parse()
                    .expect("valid generated ipv6"),
            )
        });

        Node {
            id: NodeId::new(self.id),
            hostname: self.hostname.unwrap_or_else(|| format!("node-{}", self.id)),
            user_id: if self.tags.is_empty() {
                self.user_id
            } else {
                None
            },
            ipv4,
            ipv6,
            tags: self.tags,
            expiry: None,
        }
    }
}

/// build `users` users named `user1..=userN`, each owning `per_user` nodes.
///
/// node ids are allocated sequentially starting at 1.
pub fn users_with_nodes(users: u64, per_user: u64) -> (Vec<User>, Vec<Node>) {
    let mut all_users = Vec::new();
    let mut nodes = Vec::new();
    let mut next_id = 1;

    for u in 1..=users {
        all_users.push(User::new(UserId(u), format!("user{u}")));
        for _ in 0..per_user {
            nodes.push(TestNodeBuilder::new(next_id).with_user(u).build());
            next_id += 1;
        }
    }

    (all_users, nodes)
}
