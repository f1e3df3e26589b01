use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::Result;

/// Per-call-site retry budget. Extraction gets a larger budget than
/// enrichment because enrichment attempts bill tokens.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }
}

/// Run `operation` up to `max_attempts` times with exponential backoff.
///
/// After the failure of attempt `n` (counted from 1) the caller is suspended
/// for `base_delay * 2^n` before the next attempt. The final failure is
/// propagated unchanged; nothing is wrapped or swallowed. The wrapped
/// operation must be safe to repeat: re-navigating and re-extracting is,
/// enrichment calls are retried-with-cost.
pub async fn execute<T, F, Fut>(mut operation: F, policy: RetryPolicy) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Operation succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt >= max_attempts {
                    warn!("Operation failed after {} attempts: {}", attempt, err);
                    return Err(err);
                }

                let backoff = policy.base_delay * 2u32.saturating_pow(attempt);
                warn!(
                    "Attempt {}/{} failed: {}; retrying in {:?}",
                    attempt, max_attempts, err, backoff
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
