//! Converge CLI
//!
//! Poll probes against a cluster until they converge, for use from test
//! scripts and CI jobs.

use std::process::ExitCode;

use clap::Parser;
use converge::telemetry::init_logging;

use converge_cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.log_format) {
        eprintln!("warning: {}", e);
    }

    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
