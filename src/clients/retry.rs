//! Client-call retry with exponential backoff and jitter.
//!
//! Only [`RotationError::Network`] is retried. A server `Retry-After` hint
//! replaces the computed delay when it is longer, but never exceeds
//! `max_delay`.

use crate::config::RetryConfig;
use crate::error::{Result, RotationError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Fraction of the delay added or removed at random.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            min_delay: Duration::from_millis(config.min_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: 2.0,
            jitter: config.jitter.unwrap_or(0.0).clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy {
    /// No retries; used by tests that count calls.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `retry` (0-based), before jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let ms = self.min_delay.as_millis() as f64 * self.backoff_multiplier.powi(retry as i32);
        let capped = ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn delay_for(&self, retry: u32, err: &RotationError) -> Duration {
        let mut delay = self.base_delay(retry);
        if self.jitter > 0.0 && !delay.is_zero() {
            let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            let ms = (delay.as_millis() as f64 * (1.0 + spread)).max(0.0);
            delay = Duration::from_millis(ms as u64);
        }
        match err.retry_after() {
            Some(hint) if hint > delay => hint.min(self.max_delay.max(delay)),
            _ => delay,
        }
    }

    /// Run `call` until it succeeds, fails non-transiently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && retry + 1 < self.attempts => {
                    let delay = self.delay_for(retry, &err);
                    warn!(
                        "{} failed ({}), retry {}/{} in {:?}",
                        operation,
                        err,
                        retry + 1,
                        self.attempts - 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => {
                    debug!("{} failed after {} attempt(s): {}", operation, retry + 1, err);
                    return Err(err);
                }
            }
        }
    }
}
