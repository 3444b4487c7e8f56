//! Fixed-delay retry for store operations

use crate::error::{EtlError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Attempt bound and pause between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Listing the entity types in the source table
    pub const ENUMERATION: RetryPolicy = RetryPolicy::fixed(Duration::from_secs(5));

    /// Re-running one entity type from its cursor
    pub const ENTITY: RetryPolicy = RetryPolicy::fixed(Duration::from_secs(10));

    /// Inserting one page of documents
    pub const INSERT: RetryPolicy = RetryPolicy::fixed(Duration::from_secs(3));

    pub const fn fixed(delay: Duration) -> Self {
        Self {
            max_attempts: Self::MAX_ATTEMPTS,
            delay,
        }
    }

    /// Whether another attempt follows failed attempt number `attempt`
    pub fn should_retry(&self, attempt: u32, error: &EtlError, retryable: fn(&EtlError) -> bool) -> bool {
        attempt < self.max_attempts && retryable(error)
    }
}

/// Anything but a cancellation is worth another attempt
pub fn any_error(error: &EtlError) -> bool {
    !matches!(error, EtlError::Cancelled)
}

/// Run `op` until it succeeds, the error is not retryable, or attempts run out
pub async fn retry<T, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    retryable: fn(&EtlError) -> bool,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(attempt, &e, retryable) => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_secs = policy.delay.as_secs(),
                    "{} failed: {}",
                    what,
                    e
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
