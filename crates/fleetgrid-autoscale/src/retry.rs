//! Fixed-tick retry for individual substrate calls.

use std::future::Future;
use std::time::Duration;

use fleetgrid_core::RetryConfig;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{RequestError, SubstrateError};

/// How long, and how often, a substrate call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total budget measured from the first attempt.
    pub timeout: Duration,
    /// Pause between attempts.
    pub tick: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            tick: Duration::from_secs(1),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            timeout: config.timeout(),
            tick: config.tick(),
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the budget runs out.
///
/// Only transient errors are retried. When the next attempt would start
/// after the deadline, the last transient error is wrapped in
/// [`RequestError::Timeout`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SubstrateError>>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(RequestError::Substrate(err)),
            Err(err) => {
                if Instant::now() + policy.tick > deadline {
                    return Err(RequestError::Timeout {
                        operation: operation.to_string(),
                        attempts,
                        last_error: err,
                    });
                }
                debug!(operation, attempts, error = %err, "transient substrate error, retrying");
                tokio::time::sleep(policy.tick).await;
            }
        }
    }
}
