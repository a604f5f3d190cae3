//! tailmesh - policy engine and network-map builder

use clap::Parser;
use color_eyre::eyre::Result;
use tailmesh::cli::{Cli, Command, init_logging};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    match cli.command {
        Command::Check(cmd) => {
            init_logging("warn")?;
            cmd.run()
        }
        Command::Compile(cmd) => {
            init_logging("warn")?;
            cmd.run()
        }
        Command::Netmap(cmd) => {
            init_logging("warn")?;
            cmd.run()
        }
        Command::Serve(cmd) => cmd.run().await,
    }
}
