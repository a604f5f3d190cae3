//! ties the policy store, the node inventory and the map sink together.
//!
//! every policy activation and every inventory change bumps one generation
//! counter. a recomputation pass captures the active policy, an inventory
//! snapshot and the generation, builds all maps on a blocking worker, and
//! publishes only if nothing newer has happened in the meantime.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use tailmesh_policy::{
    InventorySnapshot, NetMapBuilder, NetMapSet, NetworkMap, PolicyDocument, compile,
};
use tailmesh_types::{DistributionConfig, Generation, NodeId, PolicyVersion};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::inventory::{NodeEvent, NodeInventory};
use crate::sink::MapSink;
use crate::store::{ActivePolicy, PolicyStore, SetPolicyOutcome, StoreState};

/// pause before retrying a failed expiry pass, so a persistent failure
/// doesn't spin the event loop.
const EXPIRY_RETRY: Duration = Duration::from_secs(1);

/// what a recomputation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecomputeOutcome {
    /// maps for `generation` were published; `changed` nodes were pushed to
    /// the sink.
    Published {
        generation: Generation,
        changed: Vec<NodeId>,
    },
    /// every attempt was overtaken by a newer policy or inventory change.
    /// whichever caller made that change publishes instead.
    Superseded,
    /// the inventory event changed nothing, so no pass ran.
    Unchanged,
}

impl RecomputeOutcome {
    /// nodes pushed to the sink, empty unless published.
    pub fn changed(&self) -> &[NodeId] {
        match self {
            RecomputeOutcome::Published { changed, .. } => changed,
            _ => &[],
        }
    }
}

struct Inner {
    store: PolicyStore,
    inventory: Arc<dyn NodeInventory>,
    sink: Arc<dyn MapSink>,
    generation: AtomicU64,
    published: ArcSwap<NetMapSet>,
    /// serialises the check-and-swap of `published`
    publish: Mutex<()>,
    max_attempts: u32,
}

/// the policy core's administrative surface.
///
/// cheap to clone; every clone drives the same store and inventory.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// create a coordinator serving `document`.
    ///
    /// nothing is published until the first [`recompute`](Self::recompute)
    /// or [`compute_netmap`](Self::compute_netmap).
    pub fn new(
        document: PolicyDocument,
        inventory: Arc<dyn NodeInventory>,
        sink: Arc<dyn MapSink>,
        config: &DistributionConfig,
    ) -> Result<Self> {
        let store = PolicyStore::new(document)?;
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                inventory,
                sink,
                generation: AtomicU64::new(1),
                published: ArcSwap::from_pointee(NetMapSet::default()),
                publish: Mutex::new(()),
                max_attempts: config.max_recompute_attempts.max(1),
            }),
        })
    }

    /// the active policy document.
    pub fn get_policy(&self) -> PolicyDocument {
        self.inner.store.load().document.clone()
    }

    pub fn policy_version(&self) -> PolicyVersion {
        self.inner.store.version()
    }

    pub fn state(&self) -> StoreState {
        self.inner.store.state()
    }

    pub fn generation(&self) -> Generation {
        Generation(self.inner.generation.load(Ordering::Acquire))
    }

    /// the last published maps.
    pub fn published(&self) -> Arc<NetMapSet> {
        self.inner.published.load_full()
    }

    /// parse `json` and activate it.
    pub async fn set_policy_json(&self, json: &str) -> Result<SetPolicyOutcome> {
        let document = match PolicyDocument::from_json(json) {
            Ok(document) => document,
            Err(err) => {
                warn!(error = %err, "rejected policy document");
                return Err(err.into());
            }
        };
        self.set_policy(document).await
    }

    /// validate, compile and activate `document`.
    ///
    /// on any error the active policy is left untouched. a document equal
    /// to the active one is accepted without a new version.
    pub async fn set_policy(&self, document: PolicyDocument) -> Result<SetPolicyOutcome> {
        let guard = self.inner.store.begin_update().await;
        let current = guard.current();

        let policy = match document.validate() {
            Ok(policy) => policy,
            Err(err) => {
                warn!(version = %current.version, error = %err, "rejected policy document");
                return Err(err.into());
            }
        };
        if policy == current.policy {
            debug!(version = %current.version, "policy unchanged");
            return Ok(SetPolicyOutcome::Unchanged(current.version));
        }

        let candidate = Arc::new(ActivePolicy {
            version: current.version.next(),
            document,
            policy,
        });
        let generation = self.bump_generation();
        let maps = match self.build(Arc::clone(&candidate), generation).await {
            Ok(maps) => maps,
            Err(err) => {
                warn!(version = %current.version, error = %err, "rejected policy document");
                return Err(err);
            }
        };

        let ActivePolicy {
            document, policy, ..
        } = Arc::unwrap_or_clone(candidate);
        let version = guard.activate(document, policy);
        info!(%version, %generation, nodes = maps.len(), "activated policy");

        if self.publish(maps).await.is_none() {
            debug!(%version, "activation maps superseded, recomputing");
            self.recompute().await?;
        }
        Ok(SetPolicyOutcome::Activated(version))
    }

    /// the map for `node` under the active policy and current inventory.
    ///
    /// a registered node without a map (expired) gets an empty one.
    pub async fn compute_netmap(&self, node: NodeId) -> Result<Arc<NetworkMap>> {
        if self.is_stale() {
            self.recompute().await?;
        }
        let published = self.inner.published.load();
        if let Some(map) = published.get(node) {
            return Ok(Arc::clone(map));
        }
        if self.inner.inventory.list_nodes().iter().any(|n| n.id() == node) {
            return Ok(Arc::new(NetworkMap::empty(
                node,
                published.policy_version(),
                published.generation(),
            )));
        }
        Err(Error::NodeNotFound(node))
    }

    /// apply one inventory change and republish affected maps.
    pub async fn apply_inventory_event(&self, event: NodeEvent) -> Result<RecomputeOutcome> {
        if !self.apply_to_inventory(&event) {
            return Ok(RecomputeOutcome::Unchanged);
        }
        self.recompute().await
    }

    /// consume the inventory change stream in the background.
    ///
    /// events arriving in a burst are applied together and followed by a
    /// single pass. the loop also wakes when a node in the published maps
    /// expires, so its peers stop seeing it without waiting for an event.
    /// the task ends when every sender is dropped.
    pub fn spawn_event_loop(&self, mut events: mpsc::Receiver<NodeEvent>) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                let until_expiry = coordinator.until_next_expiry();
                let event = tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                    _ = sleep_or_pending(until_expiry) => {
                        debug!("node expiry reached");
                        if coordinator.is_stale()
                            && let Err(err) = coordinator.recompute().await
                        {
                            error!(error = %err, "failed to recompute maps after node expiry");
                            tokio::time::sleep(EXPIRY_RETRY).await;
                        }
                        continue;
                    }
                };

                let mut changed = coordinator.apply_to_inventory(&event);
                while let Ok(event) = events.try_recv() {
                    changed |= coordinator.apply_to_inventory(&event);
                }
                if changed && let Err(err) = coordinator.recompute().await {
                    error!(error = %err, "failed to recompute maps after inventory change");
                }
            }
            debug!("inventory event stream closed");
        })
    }

    /// run one pass against the current policy and inventory, retrying
    /// when overtaken or when the worker fails.
    pub async fn recompute(&self) -> Result<RecomputeOutcome> {
        for attempt in 1..=self.inner.max_attempts {
            let generation = self.generation();
            let active = self.inner.store.load();
            let maps = match self.build(active, generation).await {
                Ok(maps) => maps,
                Err(Error::Worker(reason)) => {
                    warn!(attempt, %generation, %reason, "map computation failed, retrying");
                    continue;
                }
                Err(err) => {
                    error!(%generation, error = %err, "failed to compile active policy");
                    return Err(err);
                }
            };
            match self.publish(maps).await {
                Some(changed) => {
                    return Ok(RecomputeOutcome::Published {
                        generation,
                        changed,
                    });
                }
                None => debug!(attempt, %generation, "pass superseded"),
            }
        }
        Ok(RecomputeOutcome::Superseded)
    }

    fn bump_generation(&self) -> Generation {
        Generation(self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1)
    }

    fn apply_to_inventory(&self, event: &NodeEvent) -> bool {
        if !self.inner.inventory.apply_event(event) {
            debug!(node_id = %event.node_id(), kind = event.kind(), "inventory event changed nothing");
            return false;
        }
        let generation = self.bump_generation();
        debug!(node_id = %event.node_id(), kind = event.kind(), %generation, "inventory changed");
        true
    }

    /// whether the published maps lag behind the policy, the inventory, or
    /// the clock (a node in them has expired since).
    fn is_stale(&self) -> bool {
        let published = self.inner.published.load();
        published.generation() != self.generation()
            || published.policy_version() != self.inner.store.version()
            || published.next_expiry().is_some_and(|at| at <= Utc::now())
    }

    fn until_next_expiry(&self) -> Option<Duration> {
        let at = self.inner.published.load().next_expiry()?;
        Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    /// compile `active` against a fresh inventory snapshot on a blocking
    /// worker.
    async fn build(&self, active: Arc<ActivePolicy>, generation: Generation) -> Result<NetMapSet> {
        let inventory = Arc::clone(&self.inner.inventory);
        tokio::task::spawn_blocking(move || -> Result<NetMapSet> {
            let snapshot =
                InventorySnapshot::new(inventory.list_nodes(), inventory.list_users(), generation);
            let compiled = compile(&active.policy, &snapshot)?;
            debug!(
                version = %active.version,
                %generation,
                rules = compiled.len(),
                nodes = snapshot.nodes().len(),
                "compiled policy"
            );
            Ok(NetMapBuilder::new(&compiled, &snapshot).build(active.version))
        })
        .await
        .map_err(|err| Error::Worker(err.to_string()))?
    }

    /// swap `maps` in if they are still current and push what changed.
    ///
    /// returns `None` when a newer generation or policy version exists.
    async fn publish(&self, maps: NetMapSet) -> Option<Vec<NodeId>> {
        let _lock = self.inner.publish.lock().await;
        if maps.generation() != self.generation()
            || maps.policy_version() != self.inner.store.version()
        {
            return None;
        }

        let previous = self.inner.published.load_full();
        let changed = maps.changed_since(&previous);
        let maps = Arc::new(maps);
        self.inner.published.store(Arc::clone(&maps));

        for &node in &changed {
            if let Some(map) = maps.get(node)
                && let Err(err) = self.inner.sink.publish(node, Arc::clone(map))
            {
                warn!(%node, error = %err, "failed to deliver map");
            }
        }
        debug!(
            generation = %maps.generation(),
            version = %maps.policy_version(),
            changed = changed.len(),
            "published maps"
        );
        Some(changed)
    }
}

async fn sleep_or_pending(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
