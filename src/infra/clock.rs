//! Wall-clock port.
//!
//! Lease deadlines are absolute Unix timestamps, so the scheduler needs wall
//! time. Tests swap in a clock driven by tokio's (pausable) timer.

use chrono::{DateTime, Utc};
use std::sync::Arc;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current Unix time in whole seconds.
    fn now_unix(&self) -> i64 {
        self.now().timestamp()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Clock anchored to a fixed instant and advanced by `tokio::time`.
///
/// Under `#[tokio::test(start_paused = true)]` sleeps auto-advance, so code
/// that sleeps until a wall-clock deadline runs instantly and
/// deterministically.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: tokio::time::Instant::now(),
        }
    }

    pub fn at_unix(secs: i64) -> Self {
        Self::starting_at(DateTime::from_timestamp(secs, 0).unwrap_or_default())
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.started.elapsed();
        self.origin + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}
