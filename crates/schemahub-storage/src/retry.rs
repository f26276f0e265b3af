//! Bounded retry with exponential backoff and jitter for transient
//! database failures (deadlocks, serialization aborts, busy locks).

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use schemahub_core::RegistryError;

/// Configuration for the retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first try).
    pub max_attempts: u32,
    /// Initial backoff delay.
    pub initial_backoff: Duration,
    /// Maximum backoff delay (caps exponential growth).
    pub max_backoff: Duration,
    /// Add `0..=jitter_fraction * backoff` random jitter.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(500),
            jitter_fraction: 0.5,
        }
    }
}

/// Stateless retry policy — computes the delay before a given attempt.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th retry (1-based), or `None`
    /// once the attempt budget is exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.config.max_attempts {
            return None;
        }
        let base_ms = self.config.initial_backoff.as_millis() as f64 * 2f64.powi(attempt as i32);
        let capped = base_ms.min(self.config.max_backoff.as_millis() as f64);
        let jitter = if self.config.jitter_fraction > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.config.jitter_fraction) * capped
        } else {
            0.0
        };
        Some(Duration::from_millis((capped + jitter) as u64))
    }

    /// Run `op`, retrying while it fails with a retriable error.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, RegistryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RegistryError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retriable() => match self.next_delay(attempt) {
                    Some(delay) => {
                        debug!(op = op_name, attempt, ?delay, %err, "retrying after transient error");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
    }
}
