//! Convergence poller
//!
//! Two loops share one shape: probe, evaluate, then either stop or sleep and
//! probe again.
//!
//! ```text
//! Probing -> Evaluating -> Converged
//!                       -> Sleeping -> Probing
//!                       -> TimedOut
//! ```
//!
//! [`poll_until`] stops at the first match. [`poll_counted`] always runs its
//! full attempt budget and returns a tally for the caller to judge, which is
//! what load-balancing and cookie-affinity checks need.
//!
//! Probe errors are expected while a system converges (a pod still starting,
//! a route not admitted yet), so both loops log them and keep going. Only the
//! deadline turns them into a failure.

use std::fmt;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace, warn};

use crate::error::truncate;
use crate::policy::{CountPolicy, PollPolicy};
use crate::predicate::Predicate;
use crate::probe::Probe;
use crate::{Error, Result};

/// Loop state, reported in trace logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Running the probe
    Probing,
    /// Applying the predicate to an observation
    Evaluating,
    /// Predicate matched
    Converged,
    /// Waiting before the next probe
    Sleeping,
    /// Deadline reached
    TimedOut,
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PollState::Probing => "probing",
            PollState::Evaluating => "evaluating",
            PollState::Converged => "converged",
            PollState::Sleeping => "sleeping",
            PollState::TimedOut => "timed-out",
        };
        f.write_str(s)
    }
}

/// Result of a successful [`poll_until`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    /// Observation that satisfied the predicate
    pub observation: String,
    /// Probes issued, the matching one included
    pub attempts: u32,
    /// Time from the first probe to the match
    pub elapsed: Duration,
}

/// One attempt of a counted run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Whether the predicate matched
    pub matched: bool,
    /// What the probe returned, if it returned at all
    pub observation: Option<String>,
    /// Probe error, if the attempt failed
    pub error: Option<String>,
}

/// Per-attempt verdicts of a [`poll_counted`] run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountedTally {
    /// Attempts whose observation satisfied the predicate
    pub matches: u32,
    /// Attempts that did not, errored attempts included
    pub mismatches: u32,
    /// Attempts where the probe itself failed (a subset of `mismatches`)
    pub probe_errors: u32,
    /// Every attempt, in the order issued
    pub samples: Vec<Sample>,
}

impl CountedTally {
    fn record(&mut self, matched: bool, observation: String) {
        if matched {
            self.matches += 1;
        } else {
            self.mismatches += 1;
        }
        self.samples.push(Sample {
            matched,
            observation: Some(observation),
            error: None,
        });
    }

    fn record_error(&mut self, error: String) {
        self.mismatches += 1;
        self.probe_errors += 1;
        self.samples.push(Sample {
            matched: false,
            observation: None,
            error: Some(error),
        });
    }

    /// Attempts recorded
    pub fn total(&self) -> u32 {
        self.matches.saturating_add(self.mismatches)
    }

    /// Every attempt matched
    pub fn all_matched(&self) -> bool {
        self.total() > 0 && self.mismatches == 0
    }

    /// No attempt matched
    pub fn none_matched(&self) -> bool {
        self.matches == 0
    }

    /// All attempts landed on one side, e.g. a cookie pinned every request
    /// to the same replica
    pub fn exclusive(&self) -> bool {
        self.total() > 0 && (self.matches == 0 || self.mismatches == 0)
    }

    /// Both sides saw at least one attempt, e.g. traffic reached both replicas
    pub fn split(&self) -> bool {
        self.matches > 0 && self.mismatches > 0
    }

    /// Match verdicts in order
    pub fn verdicts(&self) -> Vec<bool> {
        self.samples.iter().map(|s| s.matched).collect()
    }
}

/// Probe until `predicate` matches or `policy.timeout` passes.
///
/// Returns on the first match. Transient probe errors are logged and retried;
/// a non-transient one (the probe binary does not exist) is returned at once
/// since waiting cannot fix it. On timeout the error carries the last
/// observation and the last probe error.
pub async fn poll_until<P>(probe: &P, predicate: &Predicate, policy: &PollPolicy) -> Result<PollOutcome>
where
    P: Probe + ?Sized,
{
    policy.validate()?;

    let description = probe.describe();
    let start = Instant::now();
    let deadline = policy.deadline_from(start)?;
    let mut attempts = 0u32;
    let mut last_observation: Option<String> = None;
    let mut last_error: Option<String> = None;

    loop {
        attempts += 1;
        trace!(probe = %description, attempt = attempts, state = %PollState::Probing);

        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, probe.observe()).await {
            Ok(Ok(observation)) => {
                trace!(probe = %description, attempt = attempts, state = %PollState::Evaluating);
                if predicate.evaluate(&observation) {
                    let elapsed = start.elapsed();
                    debug!(
                        probe = %description,
                        attempt = attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        state = %PollState::Converged,
                        "predicate {} satisfied",
                        predicate
                    );
                    return Ok(PollOutcome {
                        observation,
                        attempts,
                        elapsed,
                    });
                }
                debug!(
                    probe = %description,
                    attempt = attempts,
                    observed = %truncate(&observation),
                    "not converged yet"
                );
                last_observation = Some(observation);
            }
            Ok(Err(e)) if !e.is_transient() => {
                warn!(probe = %description, error = %e, "probe failed permanently");
                return Err(e);
            }
            Ok(Err(e)) => {
                debug!(probe = %description, attempt = attempts, error = %e, "probe error, retrying");
                last_error = Some(e.to_string());
            }
            Err(_) => {
                last_error = Some(format!("attempt {} cut off at the deadline", attempts));
            }
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let nap = policy.interval.min(deadline - now);
        trace!(probe = %description, sleep_ms = nap.as_millis() as u64, state = %PollState::Sleeping);
        sleep(nap).await;
        if Instant::now() >= deadline {
            break;
        }
    }

    let elapsed = start.elapsed();
    warn!(
        probe = %description,
        attempts,
        elapsed_ms = elapsed.as_millis() as u64,
        state = %PollState::TimedOut,
        "predicate {} never satisfied",
        predicate
    );
    Err(Error::Timeout {
        probe: description,
        expected: predicate.description(),
        last_observation,
        last_error,
        attempts,
        elapsed,
    })
}

/// Probe exactly `policy.attempts` times and tally the verdicts.
///
/// Attempts run strictly one after another with `policy.poll.interval`
/// between them, so per-attempt verdicts keep their order. A failed probe
/// counts as a mismatch. The run never stops early on a match.
pub async fn poll_counted<P>(
    probe: &P,
    predicate: &Predicate,
    policy: &CountPolicy,
) -> Result<CountedTally>
where
    P: Probe + ?Sized,
{
    policy.validate()?;

    let description = probe.describe();
    let start = Instant::now();
    let deadline = policy.poll.deadline_from(start)?;
    let mut tally = CountedTally::default();

    for attempt in 1..=policy.attempts {
        if attempt > 1 {
            let now = Instant::now();
            if now + policy.poll.interval > deadline {
                return Err(sampling_timeout(description, attempt - 1, policy, tally));
            }
            sleep(policy.poll.interval).await;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, probe.observe()).await {
            Ok(Ok(observation)) => {
                let matched = predicate.evaluate(&observation);
                trace!(probe = %description, attempt, matched, "sampled");
                tally.record(matched, observation);
            }
            Ok(Err(e)) if !e.is_transient() => {
                warn!(probe = %description, error = %e, "probe failed permanently");
                return Err(e);
            }
            Ok(Err(e)) => {
                debug!(probe = %description, attempt, error = %e, "probe error counted as mismatch");
                tally.record_error(e.to_string());
            }
            Err(_) => {
                return Err(sampling_timeout(description, attempt - 1, policy, tally));
            }
        }
    }

    debug!(
        probe = %description,
        matches = tally.matches,
        mismatches = tally.mismatches,
        probe_errors = tally.probe_errors,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "sampling finished"
    );

    if let Some(required) = policy.required_matches {
        if tally.matches < required {
            return Err(Error::InsufficientMatches {
                probe: description,
                expected: predicate.description(),
                required,
                tally,
            });
        }
    }
    Ok(tally)
}

fn sampling_timeout(
    probe: String,
    completed: u32,
    policy: &CountPolicy,
    tally: CountedTally,
) -> Error {
    warn!(probe = %probe, completed, requested = policy.attempts, "sampling ran out of time");
    Error::SamplingTimeout {
        probe,
        completed,
        requested: policy.attempts,
        tally,
    }
}
