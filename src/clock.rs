// src/clock.rs
//
// External monotonic clock the instrument schedules against.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::Instant;

/// Source of "now" in seconds.
///
/// The instrument never waits on the clock; it only reads it to timestamp
/// scheduling calls and to decide which sources have finished.
pub trait Clock: Send {
    fn now(&self) -> f64;
}

/// Wall clock, zeroed at construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Clock driven by the host (audio callback position, tests, offline runs).
///
/// Clones share the same time, so the host can keep a handle and advance it
/// while the instrument owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    /// Seconds stored as f64 bits (no AtomicF64 in std)
    seconds_bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            seconds_bits: Arc::new(AtomicU64::new(start.to_bits())),
        }
    }

    pub fn set(&self, seconds: f64) {
        self.seconds_bits.store(seconds.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.seconds_bits.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new(1.5);
        let handle = clock.clone();
        handle.advance(0.25);
        assert_eq!(clock.now(), 1.75);
        clock.set(0.0);
        assert_eq!(handle.now(), 0.0);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
