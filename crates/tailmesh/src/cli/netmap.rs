//! the `netmap` subcommand - print the network maps a policy produces

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::{Context, Result, bail};
use tailmesh_policy::{NetworkMap, build_netmaps};
use tailmesh_proto::MapUpdate;
use tailmesh_types::{Generation, NodeId, PolicyVersion};

use super::{InventoryArgs, read_policy};
use crate::output::OutputFormat;

/// print per-node network maps
#[derive(Args, Debug)]
pub struct NetmapCommand {
    /// path to the policy file (json)
    pub policy: PathBuf,

    #[command(flatten)]
    pub inventory: InventoryArgs,

    /// only print the map of this node
    #[arg(short, long)]
    pub node: Option<u64>,

    /// output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    pub output: OutputFormat,
}

impl NetmapCommand {
    /// run the netmap command
    pub fn run(self) -> Result<()> {
        println!("{}", self.execute()?);
        Ok(())
    }

    /// build the maps and render the requested ones.
    pub fn execute(&self) -> Result<String> {
        let document = read_policy(&self.policy)?;
        let inventory = self.inventory.load()?;
        let known: Vec<NodeId> = inventory.nodes.iter().map(|n| n.id()).collect();
        let snapshot = inventory.snapshot(Generation::default());
        let maps = build_netmaps(&document, &snapshot, PolicyVersion::INITIAL)
            .with_context(|| format!("invalid policy: {:?}", self.policy))?;

        let Some(id) = self.node.map(NodeId::new) else {
            let updates: Vec<MapUpdate> = maps.iter().map(|(_, map)| map.to_update()).collect();
            return self.output.render(&updates);
        };

        let update = match maps.get(id) {
            Some(map) => map.to_update(),
            // registered but expired
            None if known.contains(&id) => {
                NetworkMap::empty(id, maps.policy_version(), maps.generation()).to_update()
            }
            None => bail!("node {} not found in inventory", id),
        };
        self.output.render(&update)
    }
}
