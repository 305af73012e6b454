//! Convergence waiter.
//!
//! The secret store applies creates and rotations asynchronously. Instead of
//! sleeping a fixed amount, callers poll a concrete condition ("the record
//! is discoverable", "the password changed") until it holds or the attempt
//! budget runs out.

use crate::config::RotationConfig;
use crate::error::RotationError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Result of a single predicate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    NotYet,
}

/// How a wait ended without a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError<E> {
    /// Every one of `attempts` polls returned [`Poll::NotYet`].
    TimedOut { attempts: u32 },
    /// The predicate itself failed; polling stopped.
    Predicate(E),
}

impl From<WaitError<RotationError>> for RotationError {
    fn from(err: WaitError<RotationError>) -> Self {
        match err {
            WaitError::TimedOut { attempts } => RotationError::ConvergenceTimeout { attempts },
            WaitError::Predicate(e) => e,
        }
    }
}

/// Polling schedule: `interval`, growing by `backoff_factor`, capped at
/// `max_interval`.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
}

impl PollPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff_factor: 1.0,
            max_interval: interval,
        }
    }

    /// Sleep between poll `attempt` and `attempt + 1` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let ms = self.interval.as_millis() as f64 * factor;
        let cap = self.max_interval.max(self.interval).as_millis() as f64;
        Duration::from_millis(ms.min(cap) as u64)
    }
}

impl From<&RotationConfig> for PollPolicy {
    fn from(config: &RotationConfig) -> Self {
        Self {
            max_attempts: config.poll_max_attempts,
            interval: Duration::from_millis(config.poll_interval_ms),
            backoff_factor: config.poll_backoff_factor,
            max_interval: Duration::from_millis(config.poll_max_interval_ms),
        }
    }
}

/// Poll `predicate` until it yields a value.
///
/// The predicate runs at most `policy.max_attempts` times (a budget of zero
/// still polls once). There is no sleep after the final attempt.
pub async fn wait_until<T, E, F, Fut>(policy: &PollPolicy, mut predicate: F) -> Result<T, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T>, E>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match predicate().await {
            Ok(Poll::Ready(value)) => {
                debug!("Converged after {} poll(s)", attempt);
                return Ok(value);
            }
            Ok(Poll::NotYet) => {
                if attempt < max_attempts {
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                }
            }
            Err(e) => return Err(WaitError::Predicate(e)),
        }
    }

    Err(WaitError::TimedOut {
        attempts: max_attempts,
    })
}
