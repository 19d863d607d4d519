//! Cooperative shutdown signalling.
//!
//! The renewal scheduler parks on long sleeps (until the next deadline, or a
//! retry backoff). A `ShutdownSignal` lets the shutdown handler cut those
//! sleeps short instead of waiting for the current cycle to finish.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// A one-shot, clone-cheap shutdown flag.
///
/// Triggering before anyone waits is fine: waiters check the flag first.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        // Register before checking the flag so a trigger between the two
        // cannot be missed.
        loop {
            let notified = self.notify.notified();
            if self.triggered.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

/// Why an interruptible wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Elapsed,
    Shutdown,
}

/// Run `task` unless shutdown fires first.
pub async fn run_until_shutdown<T, F>(task: F, signal: &ShutdownSignal) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        result = task => Some(result),
        _ = signal.wait() => None,
    }
}

/// Sleep for `duration` or until shutdown, whichever comes first.
pub async fn sleep_or_shutdown(duration: Duration, signal: &ShutdownSignal) -> Wake {
    match run_until_shutdown(tokio::time::sleep(duration), signal).await {
        Some(()) => Wake::Elapsed,
        None => Wake::Shutdown,
    }
}
