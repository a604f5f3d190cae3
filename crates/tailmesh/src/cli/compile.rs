//! the `compile` subcommand - print the global filter rules

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::{Context, Result};
use tailmesh_policy::compile;
use tailmesh_types::Generation;

use super::{InventoryArgs, read_policy};
use crate::output::OutputFormat;

/// compile a policy against an inventory
#[derive(Args, Debug)]
pub struct CompileCommand {
    /// path to the policy file (json)
    pub policy: PathBuf,

    #[command(flatten)]
    pub inventory: InventoryArgs,

    /// output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    pub output: OutputFormat,
}

impl CompileCommand {
    /// run the compile command
    pub fn run(self) -> Result<()> {
        println!("{}", self.execute()?);
        Ok(())
    }

    /// compile and render the filter rules.
    pub fn execute(&self) -> Result<String> {
        let document = read_policy(&self.policy)?;
        let policy = document
            .validate()
            .with_context(|| format!("invalid policy: {:?}", self.policy))?;
        let inventory = self.inventory.load()?.snapshot(Generation::default());
        let compiled = compile(&policy, &inventory).context("failed to compile policy")?;
        self.output.render(&compiled.to_filter_rules())
    }
}
