//! Exponential backoff for reads against a flaky backend.
//!
//! Only idempotent operations (bulk reads, sweeps) go through here. Holds and
//! checkouts are never retried automatically: the user re-confirms instead.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::StoreError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), capped, with up to 25% jitter.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.0..=capped * 0.25);
        Duration::from_secs_f64(capped + jitter)
    }
}

/// Runs `op` until it succeeds or the policy gives up. Every failure is logged.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                tracing::warn!("{} failed (attempt {}): {}; retrying in {:?}", what, attempt + 1, e, delay);
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!("{} failed after {} attempts: {}", what, attempt + 1, e);
                return Err(e);
            }
        }
    }
}
