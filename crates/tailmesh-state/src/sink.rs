//! map distribution towards the session layer.
//!
//! the [`BroadcastSink`] lets every streaming session handler subscribe and
//! pick out the maps addressed to its node.

use std::sync::Arc;

use tailmesh_policy::NetworkMap;
use tailmesh_types::NodeId;
use tokio::sync::broadcast;

use crate::error::SinkError;

/// receives freshly computed maps for delivery.
pub trait MapSink: Send + Sync {
    /// hand `map` to whatever pushes it to `node`.
    fn publish(&self, node: NodeId, map: Arc<NetworkMap>) -> Result<(), SinkError>;
}

/// a map addressed to one node.
#[derive(Debug, Clone)]
pub struct MapEvent {
    pub node_id: NodeId,
    pub map: Arc<NetworkMap>,
}

/// fans map updates out over a `tokio::sync::broadcast` channel.
///
/// a subscriber that falls behind receives `RecvError::Lagged` and should
/// re-fetch its map with `compute_netmap`.
#[derive(Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<MapEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MapEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(tailmesh_types::DistributionConfig::default().channel_capacity)
    }
}

impl MapSink for BroadcastSink {
    fn publish(&self, node: NodeId, map: Arc<NetworkMap>) -> Result<(), SinkError> {
        // no subscribers just means no session is connected right now
        let _ = self.sender.send(MapEvent { node_id: node, map });
        Ok(())
    }
}
