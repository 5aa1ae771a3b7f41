//! Sample command - run a probe a fixed number of times and tally matches
//!
//! Answers distribution questions: does a sticky cookie pin every request to
//! one backend, does traffic without it reach several.
//!
//! ```bash
//! converge sample --url http://web.apps.example.com/ --cookie-jar /tmp/jar \
//!     --contains web-server-2 --attempts 6 --require 6
//! ```

use std::io::Write;

use clap::Args;
use converge::config::ConvergeConfig;
use converge::{CountPolicy, CountedTally, Probe};
use serde_json::json;

use super::{CommandErrorExt, PolicyArgs, PredicateArgs, ProbeArgs};
use crate::Result;

/// Sample command arguments
#[derive(Args, Debug)]
pub struct SampleArgs {
    #[command(flatten)]
    pub probe: ProbeArgs,

    #[command(flatten)]
    pub predicate: PredicateArgs,

    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Number of probes to run
    #[arg(long, default_value_t = 6)]
    pub attempts: u32,

    /// Minimum matches for success (default: only report)
    #[arg(long)]
    pub require: Option<u32>,

    /// Print the tally as JSON
    #[arg(long)]
    pub json: bool,
}

/// Run the sample command
pub async fn run(args: SampleArgs, config: &ConvergeConfig) -> Result<()> {
    let probe = args.probe.build(config)?;
    let predicate = args.predicate.build()?;
    let mut policy = CountPolicy::new(args.attempts, args.policy.for_probe(config, &probe));
    if let Some(required) = args.require {
        policy = policy.requiring(required);
    }

    let tally = converge::router::repeat_cmd_on_client(&probe, &predicate, &policy).await?;

    let mut stdout = std::io::stdout().lock();
    if args.json {
        let report = serde_json::to_string_pretty(&tally_json(&probe.describe(), &tally)).cmd_err()?;
        writeln!(stdout, "{}", report)?;
    } else {
        writeln!(stdout, "{}", summary(&tally))?;
    }
    Ok(())
}

fn summary(tally: &CountedTally) -> String {
    let mut line = format!("matched {}/{}", tally.matches, tally.total());
    if tally.probe_errors > 0 {
        line.push_str(&format!(" ({} probe errors)", tally.probe_errors));
    }
    if tally.exclusive() {
        line.push_str(", exclusive");
    } else if tally.split() {
        line.push_str(", split");
    }
    line
}

fn tally_json(probe: &str, tally: &CountedTally) -> serde_json::Value {
    json!({
        "probe": probe,
        "matches": tally.matches,
        "mismatches": tally.mismatches,
        "probeErrors": tally.probe_errors,
        "verdicts": tally.verdicts(),
    })
}
