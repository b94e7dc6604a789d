//! Monotone time source abstraction.
//!
//! All scheduling and delta arithmetic in the pipeline runs on a monotone
//! nanosecond clock; wall time is only ever used for the report's
//! human-readable timestamp. The `Clock` trait makes the time source
//! injectable so scheduler and reader behaviour can be driven
//! deterministically in tests.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Abstraction over a monotone clock.
///
/// Implementations must be monotone: `now_ns` never decreases. `sleep` only
/// guarantees "not before"; callers re-read `now_ns` after waking.
pub trait Clock: Send + Sync {
    /// Nanoseconds elapsed since an arbitrary fixed origin.
    fn now_ns(&self) -> u64;

    /// Blocks the calling thread for at least `duration`.
    fn sleep(&self, duration: Duration);
}

/// Real monotone clock backed by `std::time::Instant`.
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
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Manually-advanced clock for deterministic tests.
///
/// `sleep` advances the clock by the requested duration instead of blocking,
/// so a scheduler driven by a `ManualClock` runs its whole grid instantly
/// while observing exactly the timestamps the test dictates.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: Mutex<u64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(now_ns: u64) -> Self {
        Self {
            now_ns: Mutex::new(now_ns),
        }
    }

    /// Moves the clock forward, simulating elapsed work.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now_ns.lock().expect("clock poisoned");
        *now += duration.as_nanos() as u64;
    }

    pub fn advance_ns(&self, ns: u64) {
        let mut now = self.now_ns.lock().expect("clock poisoned");
        *now += ns;
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        *self.now_ns.lock().expect("clock poisoned")
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
