//! Bounded retry with exponential backoff and jitter.
//!
//! Used for reads that must succeed for the caller to make progress, such as
//! fetching the controller under rollout. Unlike [`crate::poller`], nothing is
//! being waited for here: the read either works within a few attempts or the
//! failure is reported as is.
//!
//! # Example
//!
//! ```ignore
//! use converge::retry::{retry_with_backoff, RetryConfig};
//!
//! let deployment = retry_with_backoff(
//!     &RetryConfig::default(),
//!     "get router deployment",
//!     || async { api.get("router-default").await },
//! )
//! .await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::Error;

/// Backoff settings for operations that may fail transiently
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Cap on the delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Default backoff with a different attempt limit
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }
}

/// Something that knows whether retrying it could help
pub trait Retryable {
    /// `false` stops the retry loop immediately
    fn is_retryable(&self) -> bool;
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of attempts.
///
/// Returns the last error when attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + Retryable,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => {
                error!(operation = %operation_name, attempt, error = %e, "operation failed permanently");
                return Err(e);
            }
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "operation failed after max retries"
                    );
                    return Err(e);
                }

                // 0.5x to 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis() as u64,
                    "operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn succeeds_immediately() {
        let result: Result<i32, Error> =
            retry_with_backoff(&fast(3), "op", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = retry_with_backoff(&fast(5), "op", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::probe("get", "connection reset"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_max_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, Error> = retry_with_backoff(&fast(3), "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::probe("get", "always fails"))
            }
        })
        .await;

        assert!(result.unwrap_err().to_string().contains("always fails"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, Error> = retry_with_backoff(&fast(5), "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::config("bad kubeconfig"))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Config { .. })));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
