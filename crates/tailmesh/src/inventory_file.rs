//! the json inventory format the cli reads in place of a registration
//! database.
//!
//! ```json
//! {
//!   "users": [{"id": 1, "name": "alice"}],
//!   "nodes": [{"id": 1, "hostname": "laptop", "user_id": 1, "ipv4": "100.64.0.1"}]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tailmesh_policy::InventorySnapshot;
use tailmesh_state::{NodeEvent, NodeStore};
use tailmesh_types::{Generation, Node, NodeId, User};

/// users and nodes as read from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryFile {
    pub users: Vec<User>,
    pub nodes: Vec<Node>,
}

impl InventoryFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read inventory file: {:?}", path))?;
        Self::from_json(&content)
            .with_context(|| format!("failed to parse inventory file: {:?}", path))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// an immutable snapshot for one-shot compilation.
    pub fn snapshot(self, generation: Generation) -> InventorySnapshot {
        InventorySnapshot::new(self.nodes, self.users, generation)
    }

    /// a live mirror for the coordinator.
    pub fn into_store(self) -> NodeStore {
        NodeStore::new(self.nodes, self.users)
    }

    /// the events that turn `current` into this file's node list.
    ///
    /// removals come first, then additions and changes in id order.
    pub fn events_from(&self, current: &[Node]) -> Vec<NodeEvent> {
        let wanted: HashMap<NodeId, &Node> = self.nodes.iter().map(|n| (n.id(), n)).collect();

        let mut events: Vec<NodeEvent> = current
            .iter()
            .filter(|node| !wanted.contains_key(&node.id()))
            .map(|node| NodeEvent::Removed(node.id()))
            .collect();

        let existing: HashMap<NodeId, &Node> = current.iter().map(|n| (n.id(), n)).collect();
        let mut nodes: Vec<&Node> = self.nodes.iter().collect();
        nodes.sort_by_key(|n| n.id());
        for node in nodes {
            match existing.get(&node.id()) {
                None => events.push(NodeEvent::Added(node.clone())),
                Some(old) if *old == node => {}
                Some(old) => {
                    let mut moved = (*old).clone();
                    moved.set_ipv4(node.ipv4());
                    moved.set_ipv6(node.ipv6());
                    if moved == *node {
                        events.push(NodeEvent::AddressChanged {
                            id: node.id(),
                            ipv4: node.ipv4(),
                            ipv6: node.ipv6(),
                        });
                    } else {
                        events.push(NodeEvent::Updated(node.clone()));
                    }
                }
            }
        }
        events
    }
}
