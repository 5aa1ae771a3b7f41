//! Error types for convergence polling
//!
//! Errors carry enough context to tell apart a system that never started
//! converging (no observation, only probe errors) from one that converged to
//! the wrong value (a well-formed but non-matching observation).

use std::time::Duration;

use thiserror::Error;

use crate::poller::CountedTally;
use crate::rollout::{RolloutSelector, RolloutState, RolloutTarget};

/// Observations longer than this are cut in error messages.
pub const MAX_OBSERVATION_IN_MESSAGE: usize = 2048;

/// Main error type for convergence operations
#[derive(Debug, Error)]
pub enum Error {
    /// Caller supplied an unusable policy (zero timeout, interval > timeout, ...)
    #[error("invalid poll policy: {message}")]
    InvalidPolicy {
        /// What is wrong with the policy
        message: String,
    },

    /// A single probe execution failed
    #[error("probe {probe} failed: {message}")]
    Probe {
        /// Description of the probe that failed
        probe: String,
        /// Failure detail (stderr, connection error, ...)
        message: String,
        /// Whether the failure is expected while the system converges
        transient: bool,
    },

    /// Deadline passed without the predicate matching
    #[error(
        "timed out after {elapsed:?} ({attempts} attempts) waiting for {probe} to satisfy {expected}; {}",
        describe_last(.last_observation, .last_error)
    )]
    Timeout {
        /// Description of the probe
        probe: String,
        /// Description of the predicate
        expected: String,
        /// Last successful observation, if any
        last_observation: Option<String>,
        /// Last probe error, if any
        last_error: Option<String>,
        /// Number of probes issued
        attempts: u32,
        /// Wall-clock time spent
        elapsed: Duration,
    },

    /// Counted sampling hit its deadline before running every attempt
    #[error(
        "sampling {probe} ran out of time after {completed} of {requested} attempts ({} matched)",
        .tally.matches
    )]
    SamplingTimeout {
        /// Description of the probe
        probe: String,
        /// Attempts that finished
        completed: u32,
        /// Attempts requested
        requested: u32,
        /// Partial tally
        tally: CountedTally,
    },

    /// Counted sampling finished but too few attempts matched
    #[error(
        "sampling {probe}: only {} of {} attempts satisfied {expected}, {required} required",
        .tally.matches, .tally.total()
    )]
    InsufficientMatches {
        /// Description of the probe
        probe: String,
        /// Description of the predicate
        expected: String,
        /// Matches required
        required: u32,
        /// Full tally
        tally: CountedTally,
    },

    /// Controller never settled at the target generation. Always fatal.
    #[error(
        "rollout of {selector} stuck: did not settle at generation {target} within {elapsed:?}; last state: {}",
        describe_state(.last_state)
    )]
    RolloutStuck {
        /// Controller being rolled out
        selector: RolloutSelector,
        /// Generation the caller waited for
        target: RolloutTarget,
        /// Last state read from the controller
        last_state: Option<RolloutState>,
        /// Wall-clock time spent
        elapsed: Duration,
    },

    /// Resolving the controller's rollout state failed
    #[error("rollout of {selector} failed: {message}")]
    Rollout {
        /// Controller being rolled out
        selector: RolloutSelector,
        /// Failure detail
        message: String,
    },

    /// Configuration could not be loaded
    #[error("config error: {message}")]
    Config {
        /// Failure detail
        message: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// I/O error spawning or reading a process
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error decoding command output or config
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid regular expression in a predicate
    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    /// Create an invalid policy error
    pub fn invalid_policy(msg: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            message: msg.into(),
        }
    }

    /// Create a transient probe error (retried by the poller)
    pub fn probe(probe: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Probe {
            probe: probe.into(),
            message: msg.into(),
            transient: true,
        }
    }

    /// Create a probe error that retrying will not fix (bad binary path, ...)
    pub fn probe_permanent(probe: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Probe {
            probe: probe.into(),
            message: msg.into(),
            transient: false,
        }
    }

    /// Create a rollout resolution error
    pub fn rollout(selector: &RolloutSelector, msg: impl Into<String>) -> Self {
        Self::Rollout {
            selector: selector.clone(),
            message: msg.into(),
        }
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error describes a state that may clear up on its own.
    ///
    /// Misuse, timeouts and stuck rollouts are final.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Probe { transient, .. } => *transient,
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 404 && ae.code != 429
            ),
            Error::Io(_) => true,
            Error::InvalidPolicy { .. }
            | Error::Timeout { .. }
            | Error::SamplingTimeout { .. }
            | Error::InsufficientMatches { .. }
            | Error::RolloutStuck { .. }
            | Error::Rollout { .. }
            | Error::Config { .. }
            | Error::Json(_)
            | Error::Regex(_) => false,
        }
    }

    /// Last observation attached to a timeout, if any
    pub fn last_observation(&self) -> Option<&str> {
        match self {
            Error::Timeout {
                last_observation, ..
            } => last_observation.as_deref(),
            _ => None,
        }
    }

    /// Tally attached to a counted sampling failure, if any
    pub fn tally(&self) -> Option<&CountedTally> {
        match self {
            Error::SamplingTimeout { tally, .. } | Error::InsufficientMatches { tally, .. } => {
                Some(tally)
            }
            _ => None,
        }
    }
}

fn describe_last(observation: &Option<String>, error: &Option<String>) -> String {
    match (observation, error) {
        (Some(obs), _) => format!("last observed: {:?}", truncate(obs)),
        (None, Some(err)) => format!("never observed a value, last probe error: {}", err),
        (None, None) => "never observed a value".to_string(),
    }
}

fn describe_state(state: &Option<RolloutState>) -> String {
    state
        .as_ref()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "never read".to_string())
}

/// Cut an observation down to [`MAX_OBSERVATION_IN_MESSAGE`] bytes on a char boundary.
pub(crate) fn truncate(text: &str) -> &str {
    if text.len() <= MAX_OBSERVATION_IN_MESSAGE {
        return text;
    }
    let mut end = MAX_OBSERVATION_IN_MESSAGE;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout(obs: Option<&str>, err: Option<&str>) -> Error {
        Error::Timeout {
            probe: "oc get route r1".to_string(),
            expected: "contains \"Admitted\"".to_string(),
            last_observation: obs.map(str::to_string),
            last_error: err.map(str::to_string),
            attempts: 7,
            elapsed: Duration::from_secs(30),
        }
    }

    /// Story: a timeout against a well-formed but wrong value shows that value
    #[test]
    fn story_timeout_reports_wrong_value() {
        let msg = timeout(Some("Pending"), Some("connection refused")).to_string();
        assert!(msg.contains("oc get route r1"));
        assert!(msg.contains("contains \"Admitted\""));
        assert!(msg.contains("last observed: \"Pending\""));
        assert!(msg.contains("7 attempts"));
        assert!(!msg.contains("connection refused"));
    }

    /// Story: a timeout where the probe never worked shows the probe error
    #[test]
    fn story_timeout_reports_never_converged() {
        let msg = timeout(None, Some("connection refused")).to_string();
        assert!(msg.contains("never observed a value"));
        assert!(msg.contains("connection refused"));

        let msg = timeout(None, None).to_string();
        assert!(msg.ends_with("never observed a value"));
    }

    #[test]
    fn last_observation_accessor() {
        assert_eq!(timeout(Some("x"), None).last_observation(), Some("x"));
        assert_eq!(Error::invalid_policy("bad").last_observation(), None);
    }

    #[test]
    fn transient_classification() {
        assert!(Error::probe("curl", "connection refused").is_transient());
        assert!(!Error::probe_permanent("curl", "no such file").is_transient());
        assert!(!Error::invalid_policy("zero timeout").is_transient());
        assert!(!timeout(None, None).is_transient());
        assert!(!Error::config("missing").is_transient());
    }

    #[test]
    fn rollout_stuck_is_descriptive() {
        let err = Error::RolloutStuck {
            selector: RolloutSelector::ingress_controller("default"),
            target: RolloutTarget::AtLeast(2),
            last_state: None,
            elapsed: Duration::from_secs(300),
        };
        let msg = err.to_string();
        assert!(msg.contains("openshift-ingress/router-default"));
        assert!(msg.contains(">= 2"));
        assert!(msg.contains("never read"));
        assert!(!err.is_transient());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let long = "é".repeat(MAX_OBSERVATION_IN_MESSAGE);
        let cut = truncate(&long);
        assert!(cut.len() <= MAX_OBSERVATION_IN_MESSAGE);
        assert!(long.starts_with(cut));
        assert_eq!(truncate("short"), "short");
    }
}
