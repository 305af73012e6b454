//! Run-level cancellation.
//!
//! A cooperative signal built from `AtomicBool` + `Notify`. The orchestrator
//! trips it on a deadline, on Ctrl-C, or when a run-fatal error surfaces;
//! reconcilers check it only before they mutate the secret store.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

/// Clone-cheap cancellation signal. Signal once, await many.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolve once `cancel()` has been called; immediately if it already was.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent cancel()
            // cannot slip between the two.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Trip the signal after `deadline`. Abort the returned handle to disarm.
    pub fn cancel_after(&self, deadline: Duration) -> JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if !signal.is_cancelled() {
                warn!("Run deadline of {:?} reached, cancelling", deadline);
                signal.cancel();
            }
        })
    }

    /// Run `task` unless the signal fires first, in which case the task is
    /// dropped and `None` is returned.
    pub async fn run_until_cancelled<T, F>(&self, task: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        if self.is_cancelled() {
            return None;
        }
        tokio::select! {
            result = task => Some(result),
            _ = self.cancelled() => None,
        }
    }
}
