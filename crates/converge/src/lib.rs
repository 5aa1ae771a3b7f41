//! Converge - convergence polling for ingress router end-to-end tests
//!
//! End-to-end scenarios change cluster state and then have to wait for
//! controllers, rolling deployments and proxy reloads to catch up before
//! asserting. This crate provides the waiting, defined once:
//!
//! - "eventually equals/contains" with a deadline ([`poller::poll_until`])
//! - "exactly N attempts, tally the verdicts" ([`poller::poll_counted`])
//! - "the new pod after a rollout, never an old one" ([`rollout::wait_for_rollout_pod`])
//!
//! # Modules
//!
//! - [`poller`] - Poll loops and their results
//! - [`probe`] - Shell, HTTP and field-query probes and the process runner
//! - [`predicate`] - Match rules for observations
//! - [`policy`] - Timeouts, intervals and attempt counts
//! - [`rollout`] - Two-phase rollout pod resolution
//! - [`router`] - Ingress router checks built from the pieces above
//! - [`retry`] - Bounded retry with backoff for must-succeed reads
//! - [`config`] - Probe binaries and default policies
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod policy;
pub mod poller;
pub mod predicate;
pub mod probe;
pub mod retry;
pub mod rollout;
pub mod router;
pub mod telemetry;

pub use error::Error;
pub use policy::{CountPolicy, LatencyClass, PollPolicy};
pub use poller::{poll_counted, poll_until, CountedTally, PollOutcome};
pub use predicate::Predicate;
pub use probe::Probe;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
