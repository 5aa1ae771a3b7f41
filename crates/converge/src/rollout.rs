//! Rollout-aware pod resolution.
//!
//! After a config change the controller bumps its generation and replaces
//! pods gradually. For a while the old pods are still Running and still
//! match the workload's labels, so "pick any pod" returns a pod that does not
//! carry the change. Resolution here is two-phase:
//!
//! 1. Gate on the Deployment: generation at the target, observed by the
//!    controller, and every replica updated and available with no surplus
//!    old replicas left.
//! 2. Only then look up the ReplicaSet of the Deployment's current revision
//!    and return one of its serving pods.
//!
//! A rollout that never settles is a hard failure ([`Error::RolloutStuck`]).

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
#[cfg(test)]
use mockall::automock;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};

use crate::policy::PollPolicy;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::router::{ROUTER_DEPLOYMENT_PREFIX, ROUTER_NAMESPACE};
use crate::{Error, Result};

/// Annotation the deployment controller stamps on Deployments and ReplicaSets
pub const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";
/// Label tying pods to the ReplicaSet template they were created from
pub const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// Connection timeout for the rollout reader's client
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for the rollout reader's client
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Identifies the Deployment being rolled out
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RolloutSelector {
    /// Namespace of the Deployment
    pub namespace: String,
    /// Deployment name
    pub deployment: String,
}

impl RolloutSelector {
    /// Select a Deployment by namespace and name
    pub fn new(namespace: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            deployment: deployment.into(),
        }
    }

    /// The router Deployment backing an IngressController
    pub fn ingress_controller(name: &str) -> Self {
        Self::new(
            ROUTER_NAMESPACE,
            format!("{}{}", ROUTER_DEPLOYMENT_PREFIX, name),
        )
    }
}

impl fmt::Display for RolloutSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.deployment)
    }
}

/// Generation the caller is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutTarget {
    /// Any generation at or past this one (tolerates concurrent bumps)
    AtLeast(i64),
    /// Exactly this generation
    Exactly(i64),
}

impl RolloutTarget {
    /// Whether `generation` satisfies the target
    pub fn is_satisfied_by(&self, generation: i64) -> bool {
        match self {
            RolloutTarget::AtLeast(min) => generation >= *min,
            RolloutTarget::Exactly(want) => generation == *want,
        }
    }
}

impl fmt::Display for RolloutTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolloutTarget::AtLeast(g) => write!(f, ">= {}", g),
            RolloutTarget::Exactly(g) => write!(f, "== {}", g),
        }
    }
}

/// Snapshot of a Deployment's rollout progress
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloutState {
    /// `metadata.generation`
    pub generation: i64,
    /// `status.observedGeneration`
    pub observed_generation: Option<i64>,
    /// `spec.replicas`
    pub desired_replicas: i32,
    /// `status.replicas`, old and new pods together
    pub replicas: i32,
    /// `status.updatedReplicas`
    pub updated_replicas: i32,
    /// `status.availableReplicas`
    pub available_replicas: i32,
    /// Revision annotation of the Deployment
    pub revision: Option<String>,
}

impl RolloutState {
    /// Extract rollout progress from a Deployment
    pub fn from_deployment(deployment: &Deployment) -> Self {
        let status = deployment.status.as_ref();
        Self {
            generation: deployment.metadata.generation.unwrap_or(0),
            observed_generation: status.and_then(|s| s.observed_generation),
            desired_replicas: deployment
                .spec
                .as_ref()
                .and_then(|s| s.replicas)
                .unwrap_or(1),
            replicas: status.and_then(|s| s.replicas).unwrap_or(0),
            updated_replicas: status.and_then(|s| s.updated_replicas).unwrap_or(0),
            available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
            revision: deployment
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(REVISION_ANNOTATION))
                .cloned(),
        }
    }

    /// The controller has seen the current spec
    pub fn observed(&self) -> bool {
        self.observed_generation
            .is_some_and(|observed| observed >= self.generation)
    }

    /// Every replica runs the current template and no old replica is left
    pub fn complete(&self) -> bool {
        self.updated_replicas == self.desired_replicas
            && self.available_replicas >= self.desired_replicas
            && self.replicas == self.desired_replicas
    }

    /// Generation satisfies `target`, has been observed, and the rollout finished
    pub fn settled_at(&self, target: RolloutTarget) -> bool {
        target.is_satisfied_by(self.generation) && self.observed() && self.complete()
    }
}

impl fmt::Display for RolloutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "generation {}", self.generation)?;
        match self.observed_generation {
            Some(observed) => write!(f, " (observed {})", observed)?,
            None => write!(f, " (not observed)")?,
        }
        write!(
            f,
            ", {}/{} updated, {} available, {} total",
            self.updated_replicas, self.desired_replicas, self.available_replicas, self.replicas
        )?;
        if let Some(revision) = &self.revision {
            write!(f, ", revision {}", revision)?;
        }
        Ok(())
    }
}

/// The parts of a pod that decide whether it can serve a check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSummary {
    /// Pod name
    pub name: String,
    /// `status.phase`
    pub phase: Option<String>,
    /// Ready condition is True
    pub ready: bool,
    /// Has a deletion timestamp
    pub terminating: bool,
    /// Creation time, seconds since the epoch
    pub created: Option<i64>,
}

impl PodSummary {
    /// Summarize a pod
    pub fn from_pod(pod: &Pod) -> Self {
        let status = pod.status.as_ref();
        let ready = status
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            });
        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            phase: status.and_then(|s| s.phase.clone()),
            ready,
            terminating: pod.metadata.deletion_timestamp.is_some(),
            created: pod
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0.timestamp()),
        }
    }

    /// Running, ready and not on its way out
    pub fn serving(&self) -> bool {
        self.phase.as_deref() == Some("Running") && self.ready && !self.terminating
    }
}

impl fmt::Display for PodSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}{}{})",
            self.name,
            self.phase.as_deref().unwrap_or("Unknown"),
            if self.ready { ", ready" } else { "" },
            if self.terminating { ", terminating" } else { "" }
        )
    }
}

/// Read access to Deployment rollout state
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RolloutReader: Send + Sync {
    /// Current rollout progress of the Deployment
    async fn deployment_state(&self, selector: &RolloutSelector) -> Result<RolloutState>;

    /// `pod-template-hash` of the Deployment's ReplicaSet at `revision`, if it exists yet
    async fn pod_template_hash(
        &self,
        selector: &RolloutSelector,
        revision: &str,
    ) -> Result<Option<String>>;

    /// Pods created from the ReplicaSet with `pod_template_hash`
    async fn pods(
        &self,
        selector: &RolloutSelector,
        pod_template_hash: &str,
    ) -> Result<Vec<PodSummary>>;
}

/// [`RolloutReader`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeRolloutReader {
    client: Client,
}

impl KubeRolloutReader {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from a kubeconfig path, or infer one from the environment
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let mut config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    Error::config(format!("failed to read kubeconfig {}: {}", path.display(), e))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
            }
            None => Config::infer()
                .await
                .map_err(|e| Error::config(format!("failed to infer kube config: {}", e)))?,
        };
        config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
        config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
        Ok(Self::new(Client::try_from(config)?))
    }
}

fn owned_by(owners: Option<&Vec<OwnerReference>>, kind: &str, name: &str) -> bool {
    owners.is_some_and(|owners| owners.iter().any(|o| o.kind == kind && o.name == name))
}

#[async_trait]
impl RolloutReader for KubeRolloutReader {
    async fn deployment_state(&self, selector: &RolloutSelector) -> Result<RolloutState> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &selector.namespace);
        let deployment = api.get(&selector.deployment).await?;
        Ok(RolloutState::from_deployment(&deployment))
    }

    async fn pod_template_hash(
        &self,
        selector: &RolloutSelector,
        revision: &str,
    ) -> Result<Option<String>> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), &selector.namespace);
        let replica_sets = api.list(&ListParams::default()).await?;
        Ok(replica_sets
            .items
            .iter()
            .filter(|rs| {
                owned_by(
                    rs.metadata.owner_references.as_ref(),
                    "Deployment",
                    &selector.deployment,
                )
            })
            .find(|rs| {
                rs.metadata
                    .annotations
                    .as_ref()
                    .and_then(|a| a.get(REVISION_ANNOTATION))
                    .is_some_and(|r| r == revision)
            })
            .and_then(|rs| rs.metadata.labels.as_ref())
            .and_then(|labels| labels.get(POD_TEMPLATE_HASH_LABEL))
            .cloned())
    }

    async fn pods(
        &self,
        selector: &RolloutSelector,
        pod_template_hash: &str,
    ) -> Result<Vec<PodSummary>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &selector.namespace);
        let params = ListParams::default()
            .labels(&format!("{}={}", POD_TEMPLATE_HASH_LABEL, pod_template_hash));
        let replica_set = format!("{}-{}", selector.deployment, pod_template_hash);
        Ok(api
            .list(&params)
            .await?
            .items
            .iter()
            .filter(|pod| {
                owned_by(
                    pod.metadata.owner_references.as_ref(),
                    "ReplicaSet",
                    &replica_set,
                )
            })
            .map(PodSummary::from_pod)
            .collect())
    }
}

async fn read_state<R>(reader: &R, selector: &RolloutSelector) -> Result<RolloutState>
where
    R: RolloutReader + ?Sized,
{
    retry_with_backoff(&RetryConfig::default(), "read deployment", || {
        reader.deployment_state(selector)
    })
    .await
    .map_err(|e| Error::rollout(selector, format!("reading deployment: {}", e)))
}

/// Wait for the Deployment to settle at `target`, then return one of its new pods.
///
/// Never returns a pod from a ReplicaSet older than the Deployment's current
/// revision. Failing to read the Deployment after bounded retries is fatal;
/// not settling within `policy.timeout` is [`Error::RolloutStuck`]. Every API
/// read, retries included, is cut off at the deadline.
pub async fn wait_for_rollout_pod<R>(
    reader: &R,
    selector: &RolloutSelector,
    target: RolloutTarget,
    policy: &PollPolicy,
) -> Result<String>
where
    R: RolloutReader + ?Sized,
{
    policy.validate()?;

    let start = Instant::now();
    let deadline = policy.deadline_from(start)?;
    let stuck = |last_state: Option<RolloutState>| Error::RolloutStuck {
        selector: selector.clone(),
        target,
        last_state,
        elapsed: start.elapsed(),
    };

    // Phase 1: generation gate
    let mut last_state: Option<RolloutState> = None;
    let state = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let state = match timeout(remaining, read_state(reader, selector)).await {
            Ok(state) => state?,
            Err(_) => {
                debug!(rollout = %selector, "deployment read cut off at the deadline");
                return Err(stuck(last_state));
            }
        };
        if state.settled_at(target) {
            break state;
        }
        debug!(rollout = %selector, target = %target, state = %state, "rollout not settled yet");
        last_state = Some(state);

        let now = Instant::now();
        if now >= deadline {
            return Err(stuck(last_state));
        }
        sleep(policy.interval.min(deadline - now)).await;
        if Instant::now() >= deadline {
            return Err(stuck(last_state));
        }
    };

    let revision = state.revision.clone().ok_or_else(|| {
        Error::rollout(
            selector,
            format!("{} has no {} annotation", selector, REVISION_ANNOTATION),
        )
    })?;
    info!(rollout = %selector, generation = state.generation, revision = %revision, "rollout settled");

    // Phase 2: a serving pod of the current revision
    let mut last_pods: Option<String> = None;
    let mut last_error: Option<String> = None;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let lookup = match timeout(remaining, serving_pod(reader, selector, &revision)).await {
            Ok(lookup) => lookup,
            Err(_) => {
                last_error = Some(format!("attempt {} cut off at the deadline", attempts));
                break;
            }
        };
        match lookup {
            Ok(PodLookup::Found(name)) => {
                info!(rollout = %selector, pod = %name, elapsed_ms = start.elapsed().as_millis() as u64, "resolved new pod");
                return Ok(name);
            }
            Ok(PodLookup::NoReplicaSet) => {
                last_error = Some(format!("no ReplicaSet for revision {} yet", revision));
            }
            Ok(PodLookup::NotServing(pods)) => {
                last_pods = Some(pods);
            }
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => last_error = Some(e.to_string()),
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        sleep(policy.interval.min(deadline - now)).await;
        if Instant::now() >= deadline {
            break;
        }
    }

    Err(Error::Timeout {
        probe: format!("pods of {} revision {}", selector, revision),
        expected: "a running, ready pod".to_string(),
        last_observation: last_pods,
        last_error,
        attempts,
        elapsed: start.elapsed(),
    })
}

/// Wait for the first generation after `previous_generation` and return a pod from it.
pub async fn wait_for_rollout_pod_after<R>(
    reader: &R,
    selector: &RolloutSelector,
    previous_generation: i64,
    policy: &PollPolicy,
) -> Result<String>
where
    R: RolloutReader + ?Sized,
{
    wait_for_rollout_pod(
        reader,
        selector,
        RolloutTarget::AtLeast(previous_generation + 1),
        policy,
    )
    .await
}

enum PodLookup {
    Found(String),
    NoReplicaSet,
    NotServing(String),
}

async fn serving_pod<R>(reader: &R, selector: &RolloutSelector, revision: &str) -> Result<PodLookup>
where
    R: RolloutReader + ?Sized,
{
    let Some(hash) = reader.pod_template_hash(selector, revision).await? else {
        return Ok(PodLookup::NoReplicaSet);
    };
    let mut pods = reader.pods(selector, &hash).await?;
    // newest first, name as tie-break so the choice is stable
    pods.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.name.cmp(&b.name)));

    if let Some(pod) = pods.iter().find(|p| p.serving()) {
        return Ok(PodLookup::Found(pod.name.clone()));
    }
    let listing = pods
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Ok(PodLookup::NotServing(format!("[{}]", listing)))
}
