//! Retry policy for remote calls
//!
//! Wraps a single remote call and retries it with capped exponential
//! backoff when the failure is transient. Permanent failures are returned
//! immediately without sleeping.

use crate::error::BackendError;
use crate::observability::ScanMetrics;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of attempts, including the first call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Configuration for retrying one remote call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the initial call; values below 1 are treated as 1
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap on the computed exponential delay
    pub max_delay: Duration,
    /// Scale each delay by a random factor in [0.5, 1.0]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: false,
        }
    }

    /// Policy that calls exactly once
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Un-jittered backoff after the given failed attempt (1-based):
    /// `min(max_delay, base_delay * 2^(attempt-1))`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Upper bound on the time one call can spend sleeping between attempts
    pub fn worst_case_wait(&self) -> Duration {
        (1..self.attempts()).map(|a| self.backoff(a)).sum()
    }

    fn sleep_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        delay.mul_f64(factor)
    }

    /// Run `f` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `retryable` decides whether an error is transient. The last error is
    /// returned once attempts are exhausted.
    pub async fn call<T, E, F, Fut, P>(&self, operation: &str, mut f: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.attempts();
        let mut attempt = 1;

        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = %operation, attempt, "Remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < max_attempts && retryable(&e) => {
                    let delay = self.sleep_for(attempt);
                    warn!(
                        operation = %operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    ScanMetrics::new().inc_retries(operation);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// [`call`](Self::call) with the typed backend retry predicate
    pub async fn call_backend<T, F, Fut>(&self, operation: &str, f: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        self.call(operation, f, BackendError::is_retryable).await
    }
}
