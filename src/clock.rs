//! Millisecond time sources.
//!
//! All flow-core timestamps are milliseconds on a monotonic timeline whose
//! origin is chosen by the clock. The data path passes `now` explicitly; the
//! retransmission estimator and scheduler read it from a shared [`Clock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonic millisecond clock.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds.
    fn now_ms(&self) -> u64;

    /// Smallest time increment this clock can measure, in milliseconds.
    fn resolution_ms(&self) -> u64;
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is now.
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
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn resolution_ms(&self) -> u64 {
        // Instant is sub-millisecond on every supported platform
        0
    }
}

/// Manually advanced clock for deterministic tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
    resolution: u64,
}

impl ManualClock {
    /// Create a clock at `start_ms` with 1 ms resolution.
    pub fn new(start_ms: u64) -> Self {
        Self::with_resolution(start_ms, 1)
    }

    /// Create a clock at `start_ms` reporting the given resolution.
    pub fn with_resolution(start_ms: u64, resolution_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
            resolution: resolution_ms,
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn resolution_ms(&self) -> u64 {
        self.resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_ms(), 100);

        clock.advance(50);
        assert_eq!(clock.now_ms(), 150);

        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
        assert_eq!(clock.resolution_ms(), 1);
    }

    #[test]
    fn test_monotonic_clock_moves_forward() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
