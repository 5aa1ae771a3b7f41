//! Converge CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use converge::config::ConvergeConfig;
use converge::telemetry::LogFormat;

/// Converge - wait for a cluster to reach an expected state
#[derive(Parser, Debug)]
#[command(name = "converge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file (JSON); defaults to $CONVERGE_CONFIG, then built-in defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: compact or json
    #[arg(long, global = true, default_value = "compact")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll a probe until its output satisfies a predicate
    Wait(commands::wait::WaitArgs),
    /// Run a probe a fixed number of times and tally matches
    Sample(commands::sample::SampleArgs),
    /// Wait for a rollout to settle and print one of its new pods
    Rollout(commands::rollout::RolloutArgs),
    /// Wait for a router pod's HAProxy config section to contain lines
    Haproxy(commands::haproxy::HaproxyArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let config = ConvergeConfig::load(self.config.as_deref())?;
        match self.command {
            Commands::Wait(args) => commands::wait::run(args, &config).await,
            Commands::Sample(args) => commands::sample::run(args, &config).await,
            Commands::Rollout(args) => commands::rollout::run(args, &config).await,
            Commands::Haproxy(args) => commands::haproxy::run(args, &config).await,
        }
    }
}
