//! HAProxy command - wait for a section of a router pod's config to contain lines
//!
//! Without `--pod`, the newest pod of the settled router Deployment is used.
//!
//! ```bash
//! converge haproxy --ingress-controller default \
//!     --section 'backend be_http:e2e-test:unsecure' \
//!     --expect 'timeout server 5s' --expect 'balance roundrobin'
//! ```

use std::io::Write;

use clap::Args;
use converge::config::ConvergeConfig;
use converge::rollout::{wait_for_rollout_pod, KubeRolloutReader, RolloutSelector, RolloutTarget};
use converge::router::{ensure_haproxy_block_config_contains, ROUTER_NAMESPACE};
use converge::LatencyClass;
use tracing::info;

use super::{runner, PolicyArgs};
use crate::Result;

/// HAProxy command arguments
#[derive(Args, Debug)]
pub struct HaproxyArgs {
    /// IngressController whose router pod to inspect
    #[arg(long, default_value = "default")]
    pub ingress_controller: String,

    /// Router pod; resolved from the IngressController when omitted
    #[arg(long)]
    pub pod: Option<String>,

    /// Section header, e.g. 'backend be_http:ns:route'
    #[arg(long)]
    pub section: String,

    /// Line the section must contain (repeatable)
    #[arg(long = "expect", required = true)]
    pub expected: Vec<String>,

    /// Print the section on success
    #[arg(long)]
    pub print: bool,

    #[command(flatten)]
    pub policy: PolicyArgs,
}

/// Run the haproxy command
pub async fn run(args: HaproxyArgs, config: &ConvergeConfig) -> Result<()> {
    let pod = match args.pod {
        Some(pod) => pod,
        None => {
            let reader = KubeRolloutReader::connect(config.kubeconfig.as_deref()).await?;
            wait_for_rollout_pod(
                &reader,
                &RolloutSelector::ingress_controller(&args.ingress_controller),
                RolloutTarget::AtLeast(0),
                &config.policy_for(LatencyClass::Rollout),
            )
            .await?
        }
    };
    info!(pod = %pod, section = %args.section, "checking haproxy config");

    let policy = args.policy.resolve(config.policy_for(LatencyClass::Slow));
    let outcome = ensure_haproxy_block_config_contains(
        runner(config),
        &config.cli,
        ROUTER_NAMESPACE,
        &pod,
        &args.section,
        args.expected,
        &policy,
    )
    .await?;

    if args.print {
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "{}", outcome.observation)?;
    }
    Ok(())
}
