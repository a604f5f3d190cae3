//! cli subcommands for tailmesh.
//!
//! - `tailmesh check <policy>` - validate a policy document
//! - `tailmesh compile <policy> --inventory <file>` - print the compiled filter rules
//! - `tailmesh netmap <policy> --inventory <file>` - print per-node network maps
//! - `tailmesh serve` - keep maps current while policy and inventory change

mod check;
mod compile;
mod netmap;
mod serve;

pub use check::CheckCommand;
pub use compile::CompileCommand;
pub use netmap::NetmapCommand;
pub use serve::ServeCommand;

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Context, Result};
use tailmesh_policy::PolicyDocument;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::inventory_file::InventoryFile;

/// tailmesh - policy engine and network-map builder
#[derive(Parser, Debug)]
#[command(name = "tailmesh")]
#[command(about = "Policy engine and network-map builder for a mesh network", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// top-level commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// validate a policy document
    Check(CheckCommand),

    /// compile a policy against an inventory and print the filter rules
    Compile(CompileCommand),

    /// print the network maps a policy gives each node
    Netmap(NetmapCommand),

    /// keep network maps current, reloading the policy on SIGHUP
    Serve(ServeCommand),
}

/// inventory file argument shared by the offline commands.
#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    /// path to the inventory file (json users and nodes)
    #[arg(short, long, env = "TAILMESH_INVENTORY_FILE")]
    pub inventory: PathBuf,
}

impl InventoryArgs {
    fn load(&self) -> Result<InventoryFile> {
        InventoryFile::load(&self.inventory)
    }
}

/// read and parse a policy document.
pub fn read_policy(path: &Path) -> Result<PolicyDocument> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read policy file: {:?}", path))?;
    PolicyDocument::from_json(&content)
        .with_context(|| format!("failed to parse policy file: {:?}", path))
}

/// install the global tracing subscriber, logging to stderr.
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_logging(level: &str) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
