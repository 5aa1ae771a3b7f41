//! Ingress-router convergence checks.
//!
//! Thin compositions of probes, predicates and the poller for the questions
//! router scenarios keep asking: has the router Deployment picked up the
//! change, which pod carries it, did HAProxy render the expected section,
//! does traffic from outside see the new behaviour.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::policy::{CountPolicy, LatencyClass, PollPolicy};
use crate::poller::{poll_counted, poll_until, CountedTally, PollOutcome};
use crate::predicate::Predicate;
use crate::probe::{CommandRunner, FieldQueryProbe, HttpProbe, Probe, ShellProbe};
use crate::rollout::{wait_for_rollout_pod_after, RolloutReader, RolloutSelector};
use crate::{Error, Result};

/// Namespace the router Deployments live in
pub const ROUTER_NAMESPACE: &str = "openshift-ingress";
/// Router Deployment name is this prefix plus the IngressController name
pub const ROUTER_DEPLOYMENT_PREFIX: &str = "router-";
/// Rendered HAProxy configuration inside a router pod
pub const HAPROXY_CONFIG_PATH: &str = "/var/lib/haproxy/conf/haproxy.config";

/// Keywords that open a top-level HAProxy section
pub const HAPROXY_SECTION_KEYWORDS: &[&str] = &[
    "global",
    "defaults",
    "frontend",
    "backend",
    "listen",
    "resolvers",
    "peers",
    "userlist",
    "cache",
    "program",
];

/// Router Deployment name for an IngressController
pub fn router_deployment_name(ingress_controller: &str) -> String {
    format!("{}{}", ROUTER_DEPLOYMENT_PREFIX, ingress_controller)
}

/// Wait until `deployment/router-<ic>` reports `metadata.generation == expected`.
pub async fn ensure_router_deploy_generation_is(
    runner: Arc<dyn CommandRunner>,
    cli: &str,
    ingress_controller: &str,
    expected: i64,
    policy: &PollPolicy,
) -> Result<PollOutcome> {
    let probe = FieldQueryProbe::new(
        runner,
        cli,
        "deployment",
        router_deployment_name(ingress_controller),
        "{.metadata.generation}",
    )
    .in_namespace(ROUTER_NAMESPACE);

    let outcome = poll_until(&probe, &Predicate::equals(expected.to_string()), policy).await?;
    info!(ingress_controller, generation = expected, "router deployment at expected generation");
    Ok(outcome)
}

/// Name of a router pod created by the rollout that followed `previous_generation`.
pub async fn get_one_new_router_pod_from_rolling_update<R>(
    reader: &R,
    ingress_controller: &str,
    previous_generation: i64,
    policy: &PollPolicy,
) -> Result<String>
where
    R: RolloutReader + ?Sized,
{
    let selector = RolloutSelector::ingress_controller(ingress_controller);
    wait_for_rollout_pod_after(reader, &selector, previous_generation, policy).await
}

/// Extract one top-level section from an HAProxy config.
///
/// The section starts at the first unindented line equal to `header` or
/// starting with `header` followed by whitespace, and ends before the next
/// top-level section keyword or at the end of the text.
pub fn haproxy_block<'a>(config: &'a str, header: &str) -> Option<&'a str> {
    let header = header.trim();
    let mut start = None;
    let mut offset = 0;

    for line in config.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\r', '\n']);
        match start {
            None if opens_section(bare, header) => start = Some(offset),
            Some(begin) if is_section_start(bare) => return Some(&config[begin..offset]),
            _ => {}
        }
        offset += line.len();
    }
    start.map(|begin| &config[begin..])
}

fn opens_section(line: &str, header: &str) -> bool {
    match line.strip_prefix(header) {
        Some(rest) => rest.is_empty() || rest.starts_with(char::is_whitespace),
        None => false,
    }
}

fn is_section_start(line: &str) -> bool {
    if line.starts_with(char::is_whitespace) {
        return false;
    }
    line.split_whitespace()
        .next()
        .is_some_and(|word| HAPROXY_SECTION_KEYWORDS.contains(&word))
}

/// Value of `var` in `env` output (`NAME=value` per line)
pub fn env_value<'a>(env_output: &'a str, var: &str) -> Option<&'a str> {
    env_output.lines().find_map(|line| {
        line.split_once('=')
            .filter(|(name, _)| *name == var)
            .map(|(_, value)| value)
    })
}

/// A shell probe whose output is narrowed to the part a check cares about.
/// A missing part is reported as a transient probe error.
struct Narrowed<F> {
    inner: ShellProbe,
    what: String,
    extract: F,
}

#[async_trait]
impl<F> Probe for Narrowed<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn describe(&self) -> String {
        format!("{} via {}", self.what, self.inner.describe())
    }

    fn latency(&self) -> LatencyClass {
        self.inner.latency()
    }

    async fn observe(&self) -> Result<String> {
        let output = self.inner.observe().await?;
        (self.extract)(&output)
            .ok_or_else(|| Error::probe(self.describe(), format!("{} not found", self.what)))
    }
}

/// Wait until the `block_header` section of a router pod's HAProxy config
/// contains every line in `expected_lines`.
///
/// A missing section counts as "not converged yet": the router may not have
/// reloaded.
pub async fn ensure_haproxy_block_config_contains<I, S>(
    runner: Arc<dyn CommandRunner>,
    cli: &str,
    namespace: &str,
    pod: &str,
    block_header: &str,
    expected_lines: I,
    policy: &PollPolicy,
) -> Result<PollOutcome>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let header = block_header.to_string();
    let probe = Narrowed {
        inner: ShellProbe::exec_in_pod(
            runner,
            cli,
            namespace,
            pod,
            None,
            ["cat", HAPROXY_CONFIG_PATH],
        ),
        what: format!("haproxy section {:?}", block_header),
        extract: move |config: &str| haproxy_block(config, &header).map(str::to_string),
    };
    let expected: Vec<String> = expected_lines
        .into_iter()
        .map(|line| line.into().trim().to_string())
        .collect();
    poll_until(&probe, &Predicate::ContainsAll(expected), policy).await
}

/// Wait until `var` in the pod's environment satisfies `predicate`.
///
/// The observation is the variable's value; an unset variable is "not
/// converged yet".
pub async fn ensure_pod_env_matches(
    runner: Arc<dyn CommandRunner>,
    cli: &str,
    namespace: &str,
    pod: &str,
    var: &str,
    predicate: &Predicate,
    policy: &PollPolicy,
) -> Result<PollOutcome> {
    let name = var.to_string();
    let probe = Narrowed {
        inner: ShellProbe::exec_in_pod(runner, cli, namespace, pod, None, ["env"]),
        what: format!("env {}", var),
        extract: move |env: &str| env_value(env, &name).map(str::to_string),
    };
    poll_until(&probe, predicate, policy).await
}

/// Wait until a request from outside the cluster gets a response containing `expected`.
///
/// The observation is status line, headers and body together, so header
/// checks work the same as body checks.
pub async fn wait_for_outside_curl_contains(
    probe: &HttpProbe,
    expected: &str,
    policy: &PollPolicy,
) -> Result<PollOutcome> {
    poll_until(probe, &Predicate::contains(expected), policy).await
}

/// Run `probe` exactly `policy.attempts` times and tally how often `expected` matched.
///
/// Used for distribution checks: with a sticky cookie every request lands on
/// one backend, without it requests spread across backends.
pub async fn repeat_cmd_on_client<P>(
    probe: &P,
    expected: &Predicate,
    policy: &CountPolicy,
) -> Result<CountedTally>
where
    P: Probe + ?Sized,
{
    let tally = poll_counted(probe, expected, policy).await?;
    info!(
        probe = %probe.describe(),
        matches = tally.matches,
        attempts = tally.total(),
        "repeated probe finished"
    );
    Ok(tally)
}
