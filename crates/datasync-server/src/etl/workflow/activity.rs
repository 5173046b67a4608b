//! Activity execution: timeout, bounded retry, exponential backoff
//!
//! An activity is one unit of work (a table sync, a quality check, a catalog
//! listing call). Each attempt runs under the activity timeout; failures whose
//! [`EtlError::is_retryable`] is set are retried until `max_attempts` is spent.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::etl::error::{EtlError, EtlResult};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub max_interval: Duration,
    /// Total attempts including the first
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// A single attempt, no retries
    pub fn none() -> Self {
        Self {
            initial_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            max_interval: Duration::ZERO,
            max_attempts: 1,
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let delay = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        if delay >= self.max_interval.as_secs_f64() {
            return self.max_interval;
        }
        Duration::from_secs_f64(delay.max(0.0))
    }

    pub fn should_retry(&self, attempt: u32, error: &EtlError) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOptions {
    /// Ceiling for one attempt
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ActivityOptions {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self { timeout, retry }
    }
}

/// Run `op` as an activity named `name`
///
/// Cancellation is observed only between attempts: an attempt in flight is
/// never interrupted, but a pending backoff sleep is.
pub async fn run_activity<T, F, Fut>(
    name: &str,
    options: &ActivityOptions,
    cancel: &CancellationToken,
    mut op: F,
) -> EtlResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EtlResult<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        let outcome = match tokio::time::timeout(options.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(EtlError::Timeout {
                operation: name.to_string(),
                after: options.timeout,
            }),
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !options.retry.should_retry(attempt, &err) {
            return Err(err);
        }

        let delay = options.retry.delay_for(attempt);
        warn!(
            activity = %name,
            attempt,
            max_attempts = options.retry.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "activity failed, retrying"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(EtlError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
