//! Egress Verifier CLI
//!
//! Boots a probe instance in a subnet and reports which required endpoints
//! it could not reach.

use clap::Parser;

use egress_verifier_cli::telemetry::init_logging;
use egress_verifier_cli::{Cli, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json, cli.verbose)?;
    cli.run().await
}
