//! Bounded retry with a fixed delay
//!
//! The network-facing stages (fetch, stage, load) are individually
//! retryable. The default policy is deliberately conservative: one
//! retry after a multi-minute delay.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::Result;

/// Retry policy for an individually retryable stage.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Immediate retries, for tests and local runs.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay: Duration::ZERO,
        }
    }
}

/// Run `op` up to `1 + max_retries` times, sleeping `delay` between
/// attempts. The last error is returned once the budget is exhausted.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_retries + 1;
    let mut last_error = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(op = op_name, attempt, attempts, error = %e, "stage attempt failed");
                last_error = Some(e);

                if attempt < attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            },
        }
    }

    // Loop runs at least once, so last_error is always set here.
    Err(last_error.unwrap_or_else(|| crate::IngestError::Internal(format!("{} failed", op_name))))
}
