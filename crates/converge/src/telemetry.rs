//! Logging setup
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` (`RUST_LOG`,
//! default `info,converge=debug`) and a compact or JSON formatter. Poll loops
//! log every attempt at debug level, so `RUST_LOG=converge=info` quiets them.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,converge=debug,kube=info,tower=warn,hyper=warn";

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber is already installed
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),

    /// Unknown log format name
    #[error("unknown log format {0:?}, expected \"compact\" or \"json\"")]
    UnknownFormat(String),
}

/// Output format of log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single line per event
    #[default]
    Compact,
    /// One JSON object per event, for CI log collectors
    Json,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(TelemetryError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Compact => write!(f, "compact"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays free
/// for command results.
pub fn init_logging(format: LogFormat) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    result.map_err(|e| TelemetryError::SubscriberInit(e.to_string()))
}
