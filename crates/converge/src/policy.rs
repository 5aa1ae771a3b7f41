//! Poll policies: how long to wait and how often to look.
//!
//! Policies are always supplied by the caller. A pod rollout, a DNS change
//! propagating to the outside world and a cookie-affinity check all converge
//! on different time scales, so nothing here picks a timeout on the caller's
//! behalf. [`crate::config::ConvergeConfig`] holds per-class defaults for
//! callers that want them.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{Error, Result};

/// Longest timeout a policy accepts
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// How long a probe of this kind usually takes to converge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyClass {
    /// In-cluster API read
    Fast,
    /// Network request through the router
    Slow,
    /// Orchestrator work (pod rollout, controller reconcile)
    Rollout,
}

impl fmt::Display for LatencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatencyClass::Fast => write!(f, "fast"),
            LatencyClass::Slow => write!(f, "slow"),
            LatencyClass::Rollout => write!(f, "rollout"),
        }
    }
}

/// Deadline and cadence for an early-exit poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Total wall-clock budget
    pub timeout: Duration,
    /// Sleep between a failed evaluation and the next probe
    pub interval: Duration,
}

impl PollPolicy {
    /// Create a policy. Validation happens when the policy is used.
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Shorthand for whole-second policies
    pub fn secs(timeout: u64, interval: u64) -> Self {
        Self::new(Duration::from_secs(timeout), Duration::from_secs(interval))
    }

    /// Reject zero durations, timeouts above [`MAX_TIMEOUT`] and an interval
    /// longer than the timeout
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::invalid_policy("timeout must be greater than zero"));
        }
        if self.timeout > MAX_TIMEOUT {
            return Err(Error::invalid_policy(format!(
                "timeout {:?} exceeds the maximum of {:?}",
                self.timeout, MAX_TIMEOUT
            )));
        }
        if self.interval.is_zero() {
            return Err(Error::invalid_policy("interval must be greater than zero"));
        }
        if self.interval > self.timeout {
            return Err(Error::invalid_policy(format!(
                "interval {:?} is longer than timeout {:?}",
                self.interval, self.timeout
            )));
        }
        Ok(())
    }

    /// Instant at which a poll started at `start` gives up
    pub fn deadline_from(&self, start: Instant) -> Result<Instant> {
        start.checked_add(self.timeout).ok_or_else(|| {
            Error::invalid_policy(format!("timeout {:?} overflows the clock", self.timeout))
        })
    }
}

/// Policy for counted sampling: a fixed number of sequential probes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountPolicy {
    /// Exact number of probes to issue
    pub attempts: u32,
    /// Minimum matches for the run to count as a success
    pub required_matches: Option<u32>,
    /// Deadline and spacing of the attempts
    pub poll: PollPolicy,
}

impl CountPolicy {
    /// Sample `attempts` times, leaving the verdict to the caller
    pub fn new(attempts: u32, poll: PollPolicy) -> Self {
        Self {
            attempts,
            required_matches: None,
            poll,
        }
    }

    /// Require at least `required` matching attempts
    pub fn requiring(mut self, required: u32) -> Self {
        self.required_matches = Some(required);
        self
    }

    /// Require every attempt to match
    pub fn requiring_all(self) -> Self {
        let attempts = self.attempts;
        self.requiring(attempts)
    }

    /// Reject empty runs, unreachable match counts, and runs whose sleeps
    /// alone would overrun the deadline.
    pub fn validate(&self) -> Result<()> {
        self.poll.validate()?;
        if self.attempts == 0 {
            return Err(Error::invalid_policy("attempts must be greater than zero"));
        }
        if let Some(required) = self.required_matches {
            if required > self.attempts {
                return Err(Error::invalid_policy(format!(
                    "{} matches required but only {} attempts requested",
                    required, self.attempts
                )));
            }
        }
        let sleeping = self.poll.interval.saturating_mul(self.attempts - 1);
        if sleeping > self.poll.timeout {
            return Err(Error::invalid_policy(format!(
                "{} attempts every {:?} need {:?}, more than timeout {:?}",
                self.attempts, self.poll.interval, sleeping, self.poll.timeout
            )));
        }
        Ok(())
    }
}

/// Parse a duration such as `500ms`, `5s`, `2m` or `1h`. A bare number is seconds.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: u64 = number
        .parse()
        .map_err(|_| Error::invalid_policy(format!("invalid duration {:?}", text)))?;
    let duration = match unit.trim() {
        "ms" => Duration::from_millis(value),
        "" | "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        "h" => Duration::from_secs(value.saturating_mul(3600)),
        other => {
            return Err(Error::invalid_policy(format!(
                "unknown duration unit {:?} in {:?}",
                other, text
            )))
        }
    };
    Ok(duration)
}

/// Inverse of [`parse_duration`], picking the largest exact unit
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }
    let secs = duration.as_secs();
    if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero_timeout(PollPolicy::secs(0, 1), "timeout")]
    #[case::zero_interval(PollPolicy::new(Duration::from_secs(5), Duration::ZERO), "interval")]
    #[case::interval_too_long(PollPolicy::secs(5, 6), "longer than timeout")]
    #[case::timeout_too_long(PollPolicy::new(Duration::MAX, Duration::from_secs(1)), "maximum")]
    #[case::parsed_hours_overflow(PollPolicy::new(parse_duration("99999999999999999h").unwrap(), Duration::from_secs(1)), "maximum")]
    fn rejects_misuse(#[case] policy: PollPolicy, #[case] needle: &str) {
        let err = policy.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidPolicy { .. }));
        assert!(err.to_string().contains(needle), "{}", err);
    }

    #[test]
    fn accepts_interval_equal_to_timeout() {
        assert!(PollPolicy::secs(5, 5).validate().is_ok());
        assert!(PollPolicy::new(MAX_TIMEOUT, Duration::from_secs(1)).validate().is_ok());
    }

    #[test]
    fn deadline_overflow_is_an_error() {
        let now = Instant::now();
        let policy = PollPolicy::new(Duration::MAX, Duration::from_secs(1));
        assert!(matches!(policy.deadline_from(now), Err(Error::InvalidPolicy { .. })));
        assert_eq!(
            PollPolicy::secs(10, 1).deadline_from(now).unwrap(),
            now + Duration::from_secs(10)
        );
    }

    #[rstest]
    #[case::no_attempts(CountPolicy::new(0, PollPolicy::secs(10, 1)))]
    #[case::unreachable(CountPolicy::new(3, PollPolicy::secs(10, 1)).requiring(4))]
    #[case::overruns(CountPolicy::new(6, PollPolicy::secs(10, 3)))]
    fn count_policy_rejects_misuse(#[case] policy: CountPolicy) {
        assert!(matches!(
            policy.validate(),
            Err(Error::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn count_policy_sleeps_only_between_attempts() {
        // 6 attempts, 5 gaps of 2s = 10s fits exactly
        let policy = CountPolicy::new(6, PollPolicy::secs(10, 2)).requiring_all();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.required_matches, Some(6));
    }

    #[test]
    fn latency_class_serde() {
        let json = serde_json::to_string(&LatencyClass::Rollout).unwrap();
        assert_eq!(json, "\"rollout\"");
        assert_eq!(LatencyClass::Slow.to_string(), "slow");
    }

    #[rstest]
    #[case("500ms", Duration::from_millis(500))]
    #[case("5s", Duration::from_secs(5))]
    #[case("30", Duration::from_secs(30))]
    #[case("2m", Duration::from_secs(120))]
    #[case("1h", Duration::from_secs(3600))]
    #[case(" 10s ", Duration::from_secs(10))]
    fn parses_durations(#[case] text: &str, #[case] expected: Duration) {
        assert_eq!(parse_duration(text).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("s")]
    #[case("5d")]
    #[case("-1s")]
    #[case("1.5s")]
    fn rejects_bad_durations(#[case] text: &str) {
        assert!(parse_duration(text).is_err());
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::from_secs(300)), "5m");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }
}
