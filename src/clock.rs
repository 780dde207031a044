//! Monotonic time source shared by every time-boxed loop.
//!
//! Capture windows, keypad polling, playback stepping and the door dwell all
//! go through [`Clock`] so that a test can drive them without real waiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created.
    fn elapsed(&self) -> Duration;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `Instant`.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Clock that only moves when told to. `sleep` advances it instantly.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
    slept: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Total time spent in `sleep` so far.
    pub fn total_slept(&self) -> Duration {
        Duration::from_nanos(self.slept.load(Ordering::SeqCst))
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.slept
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
        self.advance(duration);
    }
}

/// Elapsed time between `start` and now on `clock`.
pub fn since(clock: &dyn Clock, start: Duration) -> Duration {
    clock.elapsed().saturating_sub(start)
}
