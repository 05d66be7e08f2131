//! Time sources
//!
//! Garbage collection compares millisecond timestamps, so every consumer
//! reads time through the [`Clock`] trait instead of calling
//! [`Instant::now`] directly. Hosts use [`SystemClock`]; tests and
//! deterministic tools use [`ManualClock`].

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Milliseconds on a monotonic timeline
pub type TimeMs = u64;

/// Source of the current time in milliseconds
pub trait Clock {
    /// Current time on this clock's timeline
    fn now_ms(&self) -> TimeMs;
}

/// Monotonic clock measuring milliseconds since its creation
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    /// Create a clock starting at zero
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> TimeMs {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually advanced clock
///
/// Clones share the same timeline, so a test can keep one handle while the
/// renderer owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<TimeMs>>,
}

impl ManualClock {
    /// Create a clock at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the absolute time
    pub fn set(&self, now: TimeMs) {
        self.now.set(now);
    }

    /// Advance the clock by `delta` milliseconds
    pub fn advance(&self, delta: TimeMs) {
        self.now.set(self.now.get().saturating_add(delta));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> TimeMs {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new();
        let handle = clock.clone();

        handle.advance(250);
        assert_eq!(clock.now_ms(), 250);

        clock.set(1000);
        assert_eq!(handle.now_ms(), 1000);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_ms();
        let second = clock.now_ms();
        assert!(second >= first);
    }
}
