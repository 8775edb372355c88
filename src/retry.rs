//! Timeout and exponential backoff for calls to external services.
//!
//! Both suspension points of the pipeline (the completion call and the
//! zero-row probe) go through [`with_retry`]. Only errors that report
//! themselves as transient are retried; a definitive answer ends the loop
//! immediately.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry and timeout settings for one kind of external call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay.
    pub max_backoff_ms: u64,
    /// Growth factor applied after every failed attempt.
    pub multiplier: f64,
    /// Per-attempt timeout.
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
            timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn single_attempt(timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            timeout_ms: timeout.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let millis = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(millis.min(self.max_backoff_ms as f64) as u64)
    }
}

/// Errors that can be classified for retrying.
pub trait Transient: Sized {
    /// Whether another attempt could succeed.
    fn is_transient(&self) -> bool;

    /// The error to report when an attempt exceeds its timeout.
    fn timed_out(after: Duration) -> Self;
}

/// Outcome of a retried call together with the number of attempts made.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: T,
    pub attempts: u32,
}

/// Run `op` under `policy`.
///
/// Each attempt is bounded by the policy timeout. Transient failures are
/// retried with exponential backoff until `max_attempts` is reached; the last
/// error is returned.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Attempted<Result<T, E>>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match tokio::time::timeout(policy.timeout(), op()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(policy.timeout())),
        };

        match result {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff_after(attempt);
                warn!(label, attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient failure, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                return Attempted {
                    result: Err(err),
                    attempts: attempt,
                }
            }
        }
    }
}
