//! the `check` subcommand - validate a policy document offline

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::{Context, Result};
use tailmesh_policy::compile;
use tailmesh_types::Generation;

use super::read_policy;
use crate::inventory_file::InventoryFile;

/// validate a policy document
#[derive(Args, Debug)]
pub struct CheckCommand {
    /// path to the policy file (json)
    pub policy: PathBuf,

    /// also compile against this inventory file
    #[arg(short, long)]
    pub inventory: Option<PathBuf>,
}

impl CheckCommand {
    /// run the check command
    pub fn run(self) -> Result<()> {
        println!("{}", self.execute()?);
        Ok(())
    }

    /// validate and return the summary line.
    pub fn execute(&self) -> Result<String> {
        let document = read_policy(&self.policy)?;
        let policy = document
            .validate()
            .with_context(|| format!("invalid policy: {:?}", self.policy))?;

        let mut summary = format!(
            "Policy is valid ({} acl entries, {} groups, {} hosts, {} tag owners)",
            policy.acls().len(),
            document.groups.len(),
            document.hosts.len(),
            document.tag_owners.len(),
        );

        if let Some(path) = &self.inventory {
            let inventory = InventoryFile::load(path)?.snapshot(Generation::default());
            let compiled = compile(&policy, &inventory)
                .with_context(|| format!("policy does not compile against {:?}", path))?;
            summary.push_str(&format!(
                "; {} rules against {} nodes",
                compiled.len(),
                inventory.nodes().len()
            ));
        }

        Ok(summary)
    }
}
