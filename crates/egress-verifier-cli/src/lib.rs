//! Egress Verifier CLI library

pub mod commands;
pub mod error;
pub mod output;
pub mod telemetry;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// Egress Verifier - check outbound connectivity from a cloud subnet
#[derive(Parser, Debug)]
#[command(name = "egress-verifier")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Enable debug logging (includes the boot script and console output)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Verify that a subnet allows the egress a cluster needs
    Egress(commands::egress::EgressArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Egress(args) => commands::egress::run(args).await,
        }
    }
}
