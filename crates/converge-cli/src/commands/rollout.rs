//! Rollout command - wait for a Deployment to settle and print a new pod
//!
//! ```bash
//! # after patching the IngressController, generation was 4 before the patch
//! pod=$(converge rollout --ingress-controller default --previous-generation 4)
//! ```

use std::io::Write;

use clap::Args;
use converge::config::ConvergeConfig;
use converge::rollout::{wait_for_rollout_pod, KubeRolloutReader, RolloutSelector, RolloutTarget};
use converge::LatencyClass;

use super::PolicyArgs;
use crate::{Error, Result};

/// Rollout command arguments
#[derive(Args, Debug)]
pub struct RolloutArgs {
    /// IngressController whose router Deployment is rolling out
    #[arg(long, conflicts_with_all = ["namespace", "deployment"])]
    pub ingress_controller: Option<String>,

    /// Namespace of the Deployment
    #[arg(long, short = 'n', requires = "deployment")]
    pub namespace: Option<String>,

    /// Deployment name
    #[arg(long, requires = "namespace")]
    pub deployment: Option<String>,

    /// Generation before the change; waits for any later one
    #[arg(long, conflicts_with = "generation")]
    pub previous_generation: Option<i64>,

    /// Wait for exactly this generation
    #[arg(long)]
    pub generation: Option<i64>,

    #[command(flatten)]
    pub policy: PolicyArgs,
}

impl RolloutArgs {
    fn selector(&self) -> Result<RolloutSelector> {
        match (&self.ingress_controller, &self.namespace, &self.deployment) {
            (Some(ic), None, None) => Ok(RolloutSelector::ingress_controller(ic)),
            (None, Some(ns), Some(name)) => Ok(RolloutSelector::new(ns, name)),
            _ => Err(Error::invalid_args(
                "either --ingress-controller or --namespace with --deployment is required",
            )),
        }
    }

    fn target(&self) -> Result<RolloutTarget> {
        match (self.previous_generation, self.generation) {
            (Some(previous), None) => Ok(RolloutTarget::AtLeast(previous + 1)),
            (None, Some(exact)) => Ok(RolloutTarget::Exactly(exact)),
            _ => Err(Error::invalid_args(
                "either --previous-generation or --generation is required",
            )),
        }
    }
}

/// Run the rollout command
pub async fn run(args: RolloutArgs, config: &ConvergeConfig) -> Result<()> {
    let selector = args.selector()?;
    let target = args.target()?;
    let policy = args.policy.resolve(config.policy_for(LatencyClass::Rollout));

    let reader = KubeRolloutReader::connect(config.kubeconfig.as_deref()).await?;
    let pod = wait_for_rollout_pod(&reader, &selector, target, &policy).await?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", pod)?;
    Ok(())
}
