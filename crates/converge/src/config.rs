//! Runtime configuration for probes and default poll policies.
//!
//! Stored as JSON. Resolution chain (highest priority first):
//! 1. Explicit path (`--config`)
//! 2. `CONVERGE_CONFIG` environment variable
//! 3. Built-in defaults
//!
//! The kubeconfig falls back to `CONVERGE_KUBECONFIG`, then `KUBECONFIG`,
//! when the file does not set one.
//!
//! ```json
//! {
//!   "cli": "oc",
//!   "policies": {
//!     "rollout": { "timeout": "10m", "interval": "10s" }
//!   }
//! }
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::policy::{LatencyClass, PollPolicy};
use crate::probe::DEFAULT_COMMAND_TIMEOUT;
use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONVERGE_CONFIG_ENV: &str = "CONVERGE_CONFIG";
/// Environment variable naming the kubeconfig, checked before `KUBECONFIG`
pub const CONVERGE_KUBECONFIG_ENV: &str = "CONVERGE_KUBECONFIG";

/// Default policy for in-cluster API reads
pub const FAST_POLICY: PollPolicy = PollPolicy {
    timeout: Duration::from_secs(30),
    interval: Duration::from_secs(1),
};
/// Default policy for requests through the router
pub const SLOW_POLICY: PollPolicy = PollPolicy {
    timeout: Duration::from_secs(120),
    interval: Duration::from_secs(3),
};
/// Default policy for rollouts
pub const ROLLOUT_POLICY: PollPolicy = PollPolicy {
    timeout: Duration::from_secs(300),
    interval: Duration::from_secs(5),
};

/// Serialized form of a [`PollPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Total budget, e.g. `"2m"`
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Poll cadence, e.g. `"3s"`
    #[serde(with = "duration_str")]
    pub interval: Duration,
}

impl From<PollPolicy> for PolicyConfig {
    fn from(p: PollPolicy) -> Self {
        Self {
            timeout: p.timeout,
            interval: p.interval,
        }
    }
}

impl From<PolicyConfig> for PollPolicy {
    fn from(p: PolicyConfig) -> Self {
        PollPolicy::new(p.timeout, p.interval)
    }
}

/// Per latency class defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDefaults {
    /// [`LatencyClass::Fast`]
    pub fast: PolicyConfig,
    /// [`LatencyClass::Slow`]
    pub slow: PolicyConfig,
    /// [`LatencyClass::Rollout`]
    pub rollout: PolicyConfig,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            fast: FAST_POLICY.into(),
            slow: SLOW_POLICY.into(),
            rollout: ROLLOUT_POLICY.into(),
        }
    }
}

/// Probe binaries, cluster access and default policies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergeConfig {
    /// Cluster CLI used for exec and field queries
    pub cli: String,
    /// curl binary for HTTP probes
    pub curl: String,
    /// Kubeconfig passed to the CLI and the API client
    pub kubeconfig: Option<PathBuf>,
    /// Per-command timeout for spawned processes
    #[serde(with = "duration_str")]
    pub command_timeout: Duration,
    /// Default policies, for callers that do not pick their own
    pub policies: PolicyDefaults,
}

impl Default for ConvergeConfig {
    fn default() -> Self {
        Self {
            cli: "oc".to_string(),
            curl: "curl".to_string(),
            kubeconfig: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            policies: PolicyDefaults::default(),
        }
    }
}

impl ConvergeConfig {
    /// Read a config file. Unset fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| Error::config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve from an explicit path, `CONVERGE_CONFIG`, or defaults, then
    /// fill the kubeconfig from the environment if unset.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONVERGE_CONFIG_ENV).map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => {
                debug!(path = %path.display(), "loading converge config");
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        if config.kubeconfig.is_none() {
            config.kubeconfig = kubeconfig_from(|var| std::env::var_os(var));
        }
        Ok(config)
    }

    /// Default policy for a latency class
    pub fn policy_for(&self, latency: LatencyClass) -> PollPolicy {
        match latency {
            LatencyClass::Fast => self.policies.fast.into(),
            LatencyClass::Slow => self.policies.slow.into(),
            LatencyClass::Rollout => self.policies.rollout.into(),
        }
    }

    /// Reject empty binaries and unusable default policies
    pub fn validate(&self) -> Result<()> {
        if self.cli.trim().is_empty() {
            return Err(Error::config("cli must not be empty"));
        }
        if self.curl.trim().is_empty() {
            return Err(Error::config("curl must not be empty"));
        }
        if self.command_timeout.is_zero() {
            return Err(Error::config("command_timeout must be greater than zero"));
        }
        for latency in [LatencyClass::Fast, LatencyClass::Slow, LatencyClass::Rollout] {
            self.policy_for(latency)
                .validate()
                .map_err(|e| Error::config(format!("{} policy: {}", latency, e)))?;
        }
        Ok(())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    use crate::policy::{format_duration, parse_duration};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

/// First non-empty kubeconfig variable; an empty one is treated as unset
fn kubeconfig_from(lookup: impl Fn(&str) -> Option<OsString>) -> Option<PathBuf> {
    [CONVERGE_KUBECONFIG_ENV, "KUBECONFIG"]
        .iter()
        .find_map(|var| lookup(var).filter(|v| !v.is_empty()))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_per_latency_class() {
        let config = ConvergeConfig::default();
        assert_eq!(config.cli, "oc");
        assert_eq!(config.policy_for(LatencyClass::Fast), PollPolicy::secs(30, 1));
        assert_eq!(config.policy_for(LatencyClass::Slow), PollPolicy::secs(120, 3));
        assert_eq!(config.policy_for(LatencyClass::Rollout), PollPolicy::secs(300, 5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = write_config(
            r#"{ "cli": "kubectl", "policies": { "rollout": { "timeout": "10m", "interval": "10s" } } }"#,
        );
        let config = ConvergeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cli, "kubectl");
        assert_eq!(config.curl, "curl");
        assert_eq!(config.policy_for(LatencyClass::Rollout), PollPolicy::secs(600, 10));
        assert_eq!(config.policy_for(LatencyClass::Fast), PollPolicy::secs(30, 1));
    }

    #[test]
    fn invalid_policy_in_file_is_rejected() {
        let file = write_config(r#"{ "policies": { "fast": { "timeout": "1s", "interval": "5s" } } }"#);
        let err = ConvergeConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("fast policy"));
    }

    #[test]
    fn bad_duration_is_a_parse_error() {
        let file = write_config(r#"{ "command_timeout": "soon" }"#);
        let err = ConvergeConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = ConvergeConfig::from_file(Path::new("/nonexistent/converge.json")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn explicit_path_wins() {
        let file = write_config(r#"{ "curl": "/usr/local/bin/curl", "kubeconfig": "/tmp/kc" }"#);
        let config = ConvergeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.curl, "/usr/local/bin/curl");
        assert_eq!(config.kubeconfig, Some(PathBuf::from("/tmp/kc")));
    }

    #[test]
    fn empty_kubeconfig_variable_falls_through() {
        let found = kubeconfig_from(|var| match var {
            CONVERGE_KUBECONFIG_ENV => Some(OsString::new()),
            "KUBECONFIG" => Some(OsString::from("/home/e2e/.kube/config")),
            _ => None,
        });
        assert_eq!(found, Some(PathBuf::from("/home/e2e/.kube/config")));
    }

    #[test]
    fn converge_kubeconfig_takes_precedence() {
        let found = kubeconfig_from(|var| Some(OsString::from(format!("/kc/{}", var))));
        assert_eq!(found, Some(PathBuf::from(format!("/kc/{}", CONVERGE_KUBECONFIG_ENV))));
        assert_eq!(kubeconfig_from(|_| Some(OsString::new())), None);
    }

    #[test]
    fn serializes_durations_as_text() {
        let json = serde_json::to_value(ConvergeConfig::default()).unwrap();
        assert_eq!(json["command_timeout"], "30s");
        assert_eq!(json["policies"]["rollout"]["timeout"], "5m");
    }
}
