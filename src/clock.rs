//! Time source used by every background loop.
//!
//! Pollers, the health monitor and the reconnect task never call
//! `tokio::time::sleep` directly; they go through a [`Clock`] so tests can
//! substitute one that records requested delays and returns immediately.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of sleeps and wall-clock timestamps
pub trait Clock: Send + Sync + 'static {
    /// Suspend the calling task for `duration`
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Seconds since the Unix epoch, with sub-second precision
    fn unix_timestamp(&self) -> f64;
}

/// Production clock backed by the tokio timer and the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }

    fn unix_timestamp(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default()
    }
}
