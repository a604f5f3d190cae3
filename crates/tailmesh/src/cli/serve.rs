//! the `serve` subcommand - keep every node's map current

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use color_eyre::eyre::{Context, Result};
use tailmesh_state::{
    BroadcastSink, Coordinator, MapEvent, NodeEvent, NodeInventory, NodeStore, SetPolicyOutcome,
    default_document,
};
use tailmesh_types::Config;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{init_logging, read_policy};
use crate::config::load_config_file;
use crate::inventory_file::InventoryFile;

/// keep network maps current, reloading on SIGHUP
#[derive(Args, Debug)]
pub struct ServeCommand {
    /// path to config file (toml format)
    #[arg(short, long, env = "TAILMESH_CONFIG")]
    config: Option<PathBuf>,

    /// path to policy file (json)
    #[arg(long, env = "TAILMESH_POLICY_FILE")]
    policy_file: Option<PathBuf>,

    /// path to inventory file (json users and nodes)
    #[arg(long, env = "TAILMESH_INVENTORY_FILE")]
    inventory_file: Option<PathBuf>,

    /// log level
    #[arg(long, env = "TAILMESH_LOG_LEVEL")]
    log_level: Option<String>,
}

impl ServeCommand {
    /// merge cli arguments over the config file.
    ///
    /// priority order: defaults -> config file -> cli flags
    fn into_config(self) -> Result<Config> {
        let mut config = load_config_file(self.config.as_deref())?.unwrap_or_default();

        if let Some(policy_file) = self.policy_file {
            config.policy_file = Some(policy_file);
        }
        if let Some(inventory_file) = self.inventory_file {
            config.inventory_file = Some(inventory_file);
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }

        Ok(config)
    }

    /// run the serve command
    pub async fn run(self) -> Result<()> {
        let explicit_config = self.config.clone();
        let config = self.into_config()?;
        init_logging(&config.logging.level)?;

        info!("Starting tailmesh...");
        match explicit_config {
            Some(path) => info!("Loaded configuration from {:?}", path),
            None => debug!("Using configuration from search paths or defaults"),
        }

        let document = match &config.policy_file {
            Some(path) => {
                info!("Loading policy from {:?}", path);
                read_policy(path)?
            }
            None => {
                warn!(
                    "No policy file provided, using default policy ({:?})",
                    config.default_policy
                );
                default_document(config.default_policy)
            }
        };

        let inventory = match &config.inventory_file {
            Some(path) => {
                info!("Loading inventory from {:?}", path);
                InventoryFile::load(path)?
            }
            None => {
                warn!("No inventory file provided, starting with an empty inventory");
                InventoryFile::default()
            }
        };
        info!(
            "Loaded {} users and {} nodes",
            inventory.users.len(),
            inventory.nodes.len()
        );

        let store = Arc::new(inventory.into_store());
        let sink = Arc::new(BroadcastSink::new(config.distribution.channel_capacity));
        let _map_logger = spawn_map_logger(sink.subscribe());

        let coordinator = Coordinator::new(document, store.clone(), sink, &config.distribution)
            .context("failed to activate initial policy")?;
        let outcome = coordinator
            .recompute()
            .await
            .context("failed to compute initial maps")?;
        info!(
            version = %coordinator.policy_version(),
            maps = outcome.changed().len(),
            "Initial maps published"
        );

        let (events_tx, events_rx) = mpsc::channel(config.distribution.channel_capacity.max(1));
        let event_loop = coordinator.spawn_event_loop(events_rx);

        let mut sighup =
            signal(SignalKind::hangup()).context("failed to register SIGHUP handler")?;
        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    reload(&config, &coordinator, &store, &events_tx).await;
                }
                res = tokio::signal::ctrl_c() => {
                    res.context("failed to listen for ctrl-c")?;
                    info!("Shutting down");
                    break;
                }
            }
        }

        drop(events_tx);
        if let Err(e) = event_loop.await {
            warn!("Inventory event loop ended abnormally: {}", e);
        }
        Ok(())
    }
}

/// re-read the policy and inventory files after SIGHUP.
async fn reload(
    config: &Config,
    coordinator: &Coordinator,
    store: &NodeStore,
    events: &mpsc::Sender<NodeEvent>,
) {
    if let Some(path) = &config.policy_file {
        info!("Received SIGHUP, reloading policy from {:?}", path);
        match std::fs::read_to_string(path) {
            Ok(content) => match coordinator.set_policy_json(&content).await {
                Ok(SetPolicyOutcome::Activated(version)) => {
                    info!(%version, "Policy reloaded successfully");
                }
                Ok(SetPolicyOutcome::Unchanged(version)) => {
                    info!(%version, "Policy unchanged");
                }
                Err(e) => error!("Failed to reload policy: {}", e),
            },
            Err(e) => error!("Failed to read policy file: {}", e),
        }
    }

    if let Some(path) = &config.inventory_file {
        info!("Reloading inventory from {:?}", path);
        let inventory = match InventoryFile::load(path) {
            Ok(inventory) => inventory,
            Err(e) => {
                error!("Failed to reload inventory: {:#}", e);
                return;
            }
        };
        for user in inventory.users.iter().cloned() {
            store.upsert_user(user);
        }
        let changes = inventory.events_from(&store.list_nodes());
        debug!("Inventory reload produced {} events", changes.len());
        for event in changes {
            if events.send(event).await.is_err() {
                error!("Inventory event loop is gone, dropping changes");
                return;
            }
        }
    }
}

/// log every map handed to the sink.
fn spawn_map_logger(mut maps: broadcast::Receiver<MapEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match maps.recv().await {
                Ok(event) => debug!(
                    node_id = %event.node_id,
                    version = %event.map.policy_version(),
                    peers = event.map.peers().len(),
                    "map ready"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "map logger lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
