//! Timing properties of the poll loops, on tokio's paused clock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use converge::probe::FnProbe;
use converge::{poll_counted, poll_until, CountPolicy, Error, PollPolicy, Predicate};
use rstest::rstest;
use tokio::time::Instant;

/// Probe that reports `before` until `ready_at` has passed, then `after`
fn flips_at(
    ready_at: Duration,
    before: &'static str,
    after: &'static str,
) -> (
    FnProbe<impl Fn() -> std::future::Ready<converge::Result<String>> + Send + Sync>,
    Arc<AtomicU32>,
) {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let start = Instant::now();
    let probe = FnProbe::new("flips", move || {
        c.fetch_add(1, Ordering::SeqCst);
        let value = if start.elapsed() >= ready_at { after } else { before };
        std::future::ready(Ok(value.to_string()))
    });
    (probe, calls)
}

#[rstest]
#[case::first_attempt(0, 60, 1)]
#[case::twelve_seconds(12, 60, 1)]
#[case::coarse_interval(7, 60, 5)]
#[case::just_before_deadline(29, 30, 1)]
#[tokio::test(start_paused = true)]
async fn success_uses_at_most_n_plus_one_attempts(
    #[case] ready_secs: u64,
    #[case] timeout_secs: u64,
    #[case] interval_secs: u64,
) {
    let ready_at = Duration::from_secs(ready_secs);
    let (probe, calls) = flips_at(ready_at, "pending", "ready");
    let policy = PollPolicy::secs(timeout_secs, interval_secs);

    let outcome = poll_until(&probe, &Predicate::equals("ready"), &policy)
        .await
        .unwrap();

    // probes land on multiples of the interval, so the match is the first
    // multiple at or after ready_at
    let n = ready_secs.div_ceil(interval_secs) as u32;
    assert!(outcome.attempts <= n + 1, "{} attempts", outcome.attempts);
    assert_eq!(calls.load(Ordering::SeqCst), outcome.attempts);
    assert!(outcome.elapsed >= ready_at);
    assert!(outcome.elapsed < ready_at + policy.interval);
    assert!(outcome.elapsed <= policy.timeout);
}

#[rstest]
#[case::even(10, 2)]
#[case::uneven(10, 3)]
#[case::interval_equals_timeout(5, 5)]
#[tokio::test(start_paused = true)]
async fn never_satisfied_times_out_exactly_at_deadline(
    #[case] timeout_secs: u64,
    #[case] interval_secs: u64,
) {
    let (probe, _) = flips_at(Duration::MAX, "generation 1", "never");
    let start = Instant::now();

    let err = poll_until(
        &probe,
        &Predicate::contains("generation 2"),
        &PollPolicy::secs(timeout_secs, interval_secs),
    )
    .await
    .unwrap_err();

    assert_eq!(start.elapsed(), Duration::from_secs(timeout_secs));
    assert_eq!(err.last_observation(), Some("generation 1"));
    assert!(err.to_string().contains("last observed: \"generation 1\""));
}

#[tokio::test(start_paused = true)]
async fn converged_state_is_idempotent() {
    let (probe, calls) = flips_at(Duration::ZERO, "", "Admitted");
    let policy = PollPolicy::secs(30, 1);

    let first = poll_until(&probe, &Predicate::contains("Admitted"), &policy)
        .await
        .unwrap();
    let second = poll_until(&probe, &Predicate::contains("Admitted"), &policy)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[rstest]
#[case(1)]
#[case(6)]
#[case(20)]
#[tokio::test(start_paused = true)]
async fn counted_runs_exactly_n_attempts(#[case] attempts: u32) {
    let (probe, calls) = flips_at(Duration::from_secs(3), "web-a", "web-b");
    let policy = CountPolicy::new(attempts, PollPolicy::secs(60, 1));

    let tally = poll_counted(&probe, &Predicate::contains("web-b"), &policy)
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), attempts);
    assert_eq!(tally.matches + tally.mismatches, attempts);
    assert_eq!(tally.samples.len(), attempts as usize);
    // attempts at 0s, 1s, 2s miss; the rest match
    assert_eq!(tally.mismatches, attempts.min(3));
}

#[tokio::test]
async fn misuse_never_probes() {
    let (probe, calls) = flips_at(Duration::ZERO, "", "x");
    for policy in [
        PollPolicy::secs(0, 1),
        PollPolicy::new(Duration::from_secs(1), Duration::ZERO),
        PollPolicy::secs(1, 2),
    ] {
        let err = poll_until(&probe, &Predicate::equals("x"), &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPolicy { .. }), "{err}");
    }
    let err = poll_counted(
        &probe,
        &Predicate::equals("x"),
        &CountPolicy::new(0, PollPolicy::secs(1, 1)),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::InvalidPolicy { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
