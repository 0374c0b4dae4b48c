//! Time source for polling.
//!
//! Everything that waits goes through a [`Clock`], so tests can run a
//! minute-long poll in virtual time.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic time elapsed since the clock's epoch.
    fn now(&self) -> Duration;

    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time backed by the tokio timer.
#[derive(Debug, Clone)]
pub struct TokioClock {
    epoch: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual time that jumps forward whenever someone sleeps.
///
/// Clones share the same timeline.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualClockState>>,
}

#[derive(Debug, Default)]
struct ManualClockState {
    now: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without sleeping.
    pub fn advance(&self, by: Duration) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.now += by;
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sleeps
            .clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).now
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            state.now += duration;
            state.sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}
