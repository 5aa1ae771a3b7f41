//! Wait command - poll a probe until its output satisfies a predicate
//!
//! ```bash
//! converge wait --query deployment/router-default -n openshift-ingress \
//!     --jsonpath '{.metadata.generation}' --equals 3 --timeout 1m
//!
//! converge wait --url https://web.apps.example.com -k \
//!     --contains 'x-frame-options: DENY' --timeout 2m --interval 5s
//!
//! converge wait --exec oc --contains Admitted -- get route r1 -n e2e \
//!     -o 'jsonpath={.status.ingress[0].conditions[0].type}'
//! ```

use std::io::Write;

use clap::Args;
use converge::config::ConvergeConfig;
use converge::{poll_until, Probe};
use tracing::info;

use super::{PolicyArgs, PredicateArgs, ProbeArgs};
use crate::Result;

/// Wait command arguments
#[derive(Args, Debug)]
pub struct WaitArgs {
    #[command(flatten)]
    pub probe: ProbeArgs,

    #[command(flatten)]
    pub predicate: PredicateArgs,

    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Print the matching observation on success
    #[arg(long)]
    pub print: bool,
}

/// Run the wait command
pub async fn run(args: WaitArgs, config: &ConvergeConfig) -> Result<()> {
    let probe = args.probe.build(config)?;
    let predicate = args.predicate.build()?;
    let policy = args.policy.for_probe(config, &probe);

    let outcome = poll_until(&probe, &predicate, &policy).await?;
    info!(
        probe = %probe.describe(),
        attempts = outcome.attempts,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "converged"
    );

    if args.print {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", outcome.observation.trim_end())?;
    }
    Ok(())
}
