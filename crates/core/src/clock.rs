// crates/core/src/clock.rs
//! Time source and blocking sleep, injectable so poll loops are testable.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Every suspension point of the core goes through this trait.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock: `sleep` advances time instantly and records the request.
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(ManualState {
                now: start,
                sleeps: Vec::new(),
            }),
        }
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut state) = self.inner.lock() {
            state.now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        }
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner
            .lock()
            .map(|s| s.sleeps.clone())
            .unwrap_or_default()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::default())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.inner.lock() {
            Ok(state) => state.now,
            Err(e) => e.into_inner().now,
        }
    }

    fn sleep(&self, duration: Duration) {
        match self.inner.lock() {
            Ok(mut state) => {
                state.now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
                state.sleeps.push(duration);
            }
            Err(e) => tracing::error!("ManualClock mutex poisoned: {e}"),
        }
    }
}

/// Time elapsed between two instants, clamped at zero when the clock went
/// backwards.
pub fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}
