//! tailmesh - policy engine and network-map builder for a mesh
//! coordination server.
//!
//! this crate holds the command-line front end:
//! - [`cli`]: `check`, `compile`, `netmap` and `serve` subcommands
//! - [`config`]: toml configuration discovery
//! - [`inventory_file`]: the json inventory format read by the cli
//! - [`output`]: json / yaml rendering

pub mod cli;
pub mod config;
pub mod inventory_file;
pub mod output;

pub use config::{CONFIG_SEARCH_PATHS, load_config_file};
pub use inventory_file::InventoryFile;
pub use output::OutputFormat;
