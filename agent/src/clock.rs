//! Time source.
//!
//! Message and session timestamps come from a [`Clock`] so tests can run
//! with a fixed or stepping time source.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of Unix-millisecond timestamps.
pub trait Clock: Send + Sync {
    /// Current time in Unix milliseconds.
    fn now_ms(&self) -> i64;
}

/// Wall-clock time via `chrono`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Deterministic clock that advances by one millisecond per reading.
#[derive(Debug, Default)]
pub struct StepClock {
    next: AtomicI64,
}

impl StepClock {
    /// Creates a clock starting at `start` milliseconds.
    #[must_use]
    pub fn starting_at(start: i64) -> Arc<Self> {
        Arc::new(Self {
            next: AtomicI64::new(start),
        })
    }
}

impl Clock for StepClock {
    fn now_ms(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_clock_is_monotonic() {
        let clock = StepClock::starting_at(100);
        assert_eq!(clock.now_ms(), 100);
        assert_eq!(clock.now_ms(), 101);
    }

    #[test]
    fn system_clock_is_past_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
