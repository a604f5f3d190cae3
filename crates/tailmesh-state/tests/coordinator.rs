//! coordinator behaviour: reloads, inventory changes and map delivery.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tailmesh_policy::{AclEntry, PolicyDocument};
use tailmesh_state::{
    BroadcastSink, Coordinator, Error, MapSink, NodeEvent, NodeInventory, NodeStore,
    RecomputeOutcome, SetPolicyOutcome, SinkError, StoreState,
};
use tailmesh_types::test_utils::{TestNodeBuilder, users_with_nodes};
use tailmesh_types::{DistributionConfig, Node, NodeId, PolicyVersion, User};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

/// two users with two nodes each: ids 1, 2 belong to user1 and 3, 4 to user2.
fn node_store() -> Arc<NodeStore> {
    let (users, nodes) = users_with_nodes(2, 2);
    Arc::new(NodeStore::new(nodes, users))
}

fn own_user_only() -> PolicyDocument {
    PolicyDocument {
        acls: vec![
            AclEntry::accept(&["user1@"], &["user1@:*"]),
            AclEntry::accept(&["user2@"], &["user2@:*"]),
        ],
        ..Default::default()
    }
}

fn coordinator(inventory: Arc<dyn NodeInventory>, sink: Arc<dyn MapSink>) -> Coordinator {
    Coordinator::new(
        PolicyDocument::allow_all(),
        inventory,
        sink,
        &DistributionConfig::default(),
    )
    .unwrap()
}

async fn peer_ids(coordinator: &Coordinator, node: u64) -> Vec<NodeId> {
    coordinator
        .compute_netmap(NodeId::new(node))
        .await
        .unwrap()
        .peer_ids()
}

fn ids(ids: &[u64]) -> Vec<NodeId> {
    ids.iter().copied().map(NodeId::new).collect()
}

/// records every delivery; refuses maps for `failing`.
#[derive(Default)]
struct RecordingSink {
    failing: Option<NodeId>,
    delivered: Mutex<Vec<NodeId>>,
}

impl MapSink for RecordingSink {
    fn publish(
        &self,
        node: NodeId,
        _map: Arc<tailmesh_policy::NetworkMap>,
    ) -> Result<(), SinkError> {
        if self.failing == Some(node) {
            return Err(SinkError {
                node,
                reason: "session closed".to_string(),
            });
        }
        self.delivered.lock().unwrap().push(node);
        Ok(())
    }
}

#[tokio::test]
async fn test_initial_policy_is_active() {
    let coordinator = coordinator(node_store(), Arc::new(BroadcastSink::default()));

    assert_eq!(coordinator.policy_version(), PolicyVersion::INITIAL);
    assert_eq!(coordinator.state(), StoreState::Active(PolicyVersion(1)));
    assert_eq!(coordinator.get_policy(), PolicyDocument::allow_all());
    assert_eq!(peer_ids(&coordinator, 1).await, ids(&[2, 3, 4]));
}

#[tokio::test]
async fn test_policy_update_flips_reachability() {
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(node_store(), sink.clone());
    assert_eq!(peer_ids(&coordinator, 1).await, ids(&[2, 3, 4]));
    sink.delivered.lock().unwrap().clear();

    let outcome = coordinator.set_policy(own_user_only()).await.unwrap();
    assert_eq!(outcome, SetPolicyOutcome::Activated(PolicyVersion(2)));
    assert_eq!(coordinator.state(), StoreState::Active(PolicyVersion(2)));
    assert_eq!(coordinator.get_policy(), own_user_only());

    assert_eq!(peer_ids(&coordinator, 1).await, ids(&[2]));
    assert_eq!(peer_ids(&coordinator, 4).await, ids(&[3]));

    let mut delivered = sink.delivered.lock().unwrap().clone();
    delivered.sort();
    assert_eq!(delivered, ids(&[1, 2, 3, 4]));

    let map = coordinator.compute_netmap(NodeId::new(1)).await.unwrap();
    assert_eq!(map.policy_version(), PolicyVersion(2));

    // and back again
    let outcome = coordinator
        .set_policy(PolicyDocument::allow_all())
        .await
        .unwrap();
    assert_eq!(outcome.version(), PolicyVersion(3));
    assert_eq!(peer_ids(&coordinator, 1).await, ids(&[2, 3, 4]));
}

#[tokio::test]
async fn test_reactivating_same_policy_is_a_no_op() {
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(node_store(), sink.clone());
    coordinator.recompute().await.unwrap();
    let generation = coordinator.generation();
    sink.delivered.lock().unwrap().clear();

    let outcome = coordinator
        .set_policy(PolicyDocument::allow_all())
        .await
        .unwrap();
    assert_eq!(outcome, SetPolicyOutcome::Unchanged(PolicyVersion(1)));

    let outcome = coordinator
        .set_policy_json(r#"{"acls": [{"action": "accept", "src": ["*"], "dst": ["*:*"]}]}"#)
        .await
        .unwrap();
    assert_eq!(outcome, SetPolicyOutcome::Unchanged(PolicyVersion(1)));

    assert_eq!(coordinator.generation(), generation);
    assert!(sink.delivered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_policy_leaves_active_untouched() {
    let coordinator = coordinator(node_store(), Arc::new(BroadcastSink::default()));

    let err = coordinator.set_policy_json("{not json").await.unwrap_err();
    assert!(matches!(err, Error::Policy(_)));

    let undefined_group = PolicyDocument {
        acls: vec![AclEntry::accept(&["group:missing"], &["*:*"])],
        ..Default::default()
    };
    let err = coordinator.set_policy(undefined_group).await.unwrap_err();
    assert!(matches!(err, Error::Policy(_)));

    let bad_port = r#"{"acls": [{"action": "accept", "src": ["*"], "dst": ["*:99999"]}]}"#;
    assert!(coordinator.set_policy_json(bad_port).await.is_err());

    assert_eq!(coordinator.state(), StoreState::Active(PolicyVersion(1)));
    assert_eq!(coordinator.get_policy(), PolicyDocument::allow_all());
    assert_eq!(peer_ids(&coordinator, 1).await, ids(&[2, 3, 4]));
}

#[tokio::test]
async fn test_inventory_events_republish_affected_maps() {
    let store = node_store();
    let sink = Arc::new(BroadcastSink::new(16));
    let coordinator = coordinator(store.clone(), sink.clone());
    coordinator.set_policy(own_user_only()).await.unwrap();
    let mut rx = sink.subscribe();

    let added = TestNodeBuilder::new(5).with_user(1).build();
    let outcome = coordinator
        .apply_inventory_event(NodeEvent::Added(added))
        .await
        .unwrap();

    // user1's nodes see the newcomer; user2's maps did not change
    assert_eq!(outcome.changed(), ids(&[1, 2, 5]).as_slice());
    for expected in ids(&[1, 2, 5]) {
        let event = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("map should be delivered")
            .unwrap();
        assert_eq!(event.node_id, expected);
    }
    assert_eq!(peer_ids(&coordinator, 1).await, ids(&[2, 5]));

    let outcome = coordinator
        .apply_inventory_event(NodeEvent::Removed(NodeId::new(2)))
        .await
        .unwrap();
    assert_eq!(outcome.changed(), ids(&[1, 5]).as_slice());
    assert_eq!(peer_ids(&coordinator, 5).await, ids(&[1]));
}

#[tokio::test]
async fn test_address_change_is_reflected_in_filters() {
    let coordinator = coordinator(node_store(), Arc::new(BroadcastSink::default()));
    coordinator.recompute().await.unwrap();

    let moved = "100.64.9.9".parse().unwrap();
    let outcome = coordinator
        .apply_inventory_event(NodeEvent::AddressChanged {
            id: NodeId::new(2),
            ipv4: Some(moved),
            ipv6: None,
        })
        .await
        .unwrap();
    assert!(outcome.changed().contains(&NodeId::new(1)));

    let map = coordinator.compute_netmap(NodeId::new(1)).await.unwrap();
    let peer = map.peer(NodeId::new(2)).unwrap();
    assert_eq!(peer.addresses, vec![moved]);
}

#[tokio::test]
async fn test_no_op_event_skips_recompute() {
    let coordinator = coordinator(node_store(), Arc::new(BroadcastSink::default()));
    coordinator.recompute().await.unwrap();
    let generation = coordinator.generation();

    let outcome = coordinator
        .apply_inventory_event(NodeEvent::Removed(NodeId::new(42)))
        .await
        .unwrap();
    assert_eq!(outcome, RecomputeOutcome::Unchanged);
    assert_eq!(coordinator.generation(), generation);
}

#[tokio::test]
async fn test_compute_netmap_unknown_and_expired_nodes() {
    let store = node_store();
    let coordinator = coordinator(store.clone(), Arc::new(BroadcastSink::default()));

    let err = coordinator
        .compute_netmap(NodeId::new(99))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NodeNotFound(id) if id == NodeId::new(99)));

    let mut expired = store.get(NodeId::new(4)).unwrap();
    expired.set_expiry(Some(Utc::now() - chrono::Duration::hours(1)));
    coordinator
        .apply_inventory_event(NodeEvent::Updated(expired))
        .await
        .unwrap();

    let map = coordinator.compute_netmap(NodeId::new(4)).await.unwrap();
    assert!(map.peers().is_empty());
    assert_eq!(peer_ids(&coordinator, 1).await, ids(&[2, 3]));
}

#[tokio::test]
async fn test_sink_failure_does_not_abort_pass() {
    let sink = Arc::new(RecordingSink {
        failing: Some(NodeId::new(1)),
        ..Default::default()
    });
    let coordinator = coordinator(node_store(), sink.clone());

    let outcome = coordinator.recompute().await.unwrap();
    assert_eq!(outcome.changed(), ids(&[1, 2, 3, 4]).as_slice());
    assert_eq!(*sink.delivered.lock().unwrap(), ids(&[2, 3, 4]));
}

#[tokio::test]
async fn test_event_loop_follows_inventory_stream() {
    let sink = Arc::new(BroadcastSink::new(16));
    let coordinator = coordinator(node_store(), sink.clone());
    coordinator.recompute().await.unwrap();
    let mut rx = sink.subscribe();

    let (tx, events) = mpsc::channel(8);
    let handle = coordinator.spawn_event_loop(events);

    tx.send(NodeEvent::Removed(NodeId::new(4))).await.unwrap();
    let event = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("map should be delivered")
        .unwrap();
    assert_eq!(event.node_id, NodeId::new(1));
    assert_eq!(event.map.peer_ids(), ids(&[2, 3]));

    drop(tx);
    timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop ends once the stream closes")
        .unwrap();
}

/// the usual four nodes, with node 4 expiring `after` from now.
fn store_with_expiring_node(after: chrono::Duration) -> Arc<NodeStore> {
    let (users, mut nodes) = users_with_nodes(2, 2);
    nodes[3].set_expiry(Some(Utc::now() + after));
    Arc::new(NodeStore::new(nodes, users))
}

#[tokio::test]
async fn test_node_expiry_outdates_published_maps() {
    let coordinator = coordinator(
        store_with_expiring_node(chrono::Duration::milliseconds(200)),
        Arc::new(BroadcastSink::default()),
    );
    assert_eq!(peer_ids(&coordinator, 1).await, ids(&[2, 3, 4]));
    assert!(coordinator.published().next_expiry().is_some());
    let generation = coordinator.generation();

    tokio::time::sleep(Duration::from_millis(400)).await;

    // no event arrived, the clock alone made the maps outdated
    assert_eq!(peer_ids(&coordinator, 1).await, ids(&[2, 3]));
    assert_eq!(coordinator.generation(), generation);
    assert!(coordinator.published().get(NodeId::new(4)).is_none());
    assert_eq!(coordinator.published().next_expiry(), None);
}

#[tokio::test]
async fn test_event_loop_wakes_on_node_expiry() {
    let sink = Arc::new(BroadcastSink::new(16));
    let coordinator = coordinator(
        store_with_expiring_node(chrono::Duration::milliseconds(300)),
        sink.clone(),
    );
    coordinator.recompute().await.unwrap();
    let mut rx = sink.subscribe();

    let (tx, events) = mpsc::channel(8);
    let handle = coordinator.spawn_event_loop(events);

    let event = timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("expiry should trigger a push")
        .unwrap();
    assert_eq!(event.node_id, NodeId::new(1));
    assert_eq!(event.map.peer_ids(), ids(&[2, 3]));

    drop(tx);
    timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop ends once the stream closes")
        .unwrap();
}

/// inventory whose first listing blocks until the test releases it.
struct GatedInventory {
    store: NodeStore,
    gate: Mutex<Option<(oneshot::Sender<()>, std::sync::mpsc::Receiver<()>)>>,
}

impl NodeInventory for GatedInventory {
    fn list_nodes(&self) -> Vec<Node> {
        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv();
        }
        self.store.list_nodes()
    }

    fn list_users(&self) -> Vec<User> {
        self.store.list_users()
    }

    fn apply_event(&self, event: &NodeEvent) -> bool {
        self.store.apply_event(event)
    }
}

#[tokio::test]
async fn test_stale_pass_is_superseded() {
    let (users, nodes) = users_with_nodes(2, 2);
    let (entered_tx, entered_rx) = oneshot::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel();
    let inventory = Arc::new(GatedInventory {
        store: NodeStore::new(nodes, users),
        gate: Mutex::new(Some((entered_tx, release_rx))),
    });
    let config = DistributionConfig {
        max_recompute_attempts: 1,
        ..Default::default()
    };
    let coordinator = Coordinator::new(
        PolicyDocument::allow_all(),
        inventory,
        Arc::new(BroadcastSink::default()),
        &config,
    )
    .unwrap();

    let slow = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.recompute().await }
    });
    entered_rx.await.unwrap();

    // a newer change lands while the first pass is still listing nodes
    let added = TestNodeBuilder::new(5).with_user(2).build();
    let outcome = coordinator
        .apply_inventory_event(NodeEvent::Added(added))
        .await
        .unwrap();
    assert!(matches!(outcome, RecomputeOutcome::Published { .. }));

    release_tx.send(()).unwrap();
    assert_eq!(slow.await.unwrap().unwrap(), RecomputeOutcome::Superseded);

    let published = coordinator.published();
    assert_eq!(published.generation(), coordinator.generation());
    assert_eq!(published.len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_a_mixed_policy() {
    let coordinator = coordinator(node_store(), Arc::new(BroadcastSink::default()));
    coordinator.recompute().await.unwrap();

    let reader = tokio::spawn({
        let coordinator = coordinator.clone();
        async move {
            for _ in 0..200 {
                let map = coordinator.compute_netmap(NodeId::new(1)).await.unwrap();
                // odd versions allow everything, even versions isolate users
                let expected = if map.policy_version().0 % 2 == 1 {
                    ids(&[2, 3, 4])
                } else {
                    ids(&[2])
                };
                assert_eq!(map.peer_ids(), expected, "version {}", map.policy_version());
                tokio::task::yield_now().await;
            }
        }
    });

    for round in 0..20 {
        let document = if round % 2 == 0 {
            own_user_only()
        } else {
            PolicyDocument::allow_all()
        };
        coordinator.set_policy(document).await.unwrap();
        tokio::task::yield_now().await;
    }

    reader.await.unwrap();
    assert_eq!(coordinator.policy_version(), PolicyVersion(21));
}
