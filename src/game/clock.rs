//! Monotonic time seam (SPEC_FULL.md §4.8).
//!
//! Every timestamp the game model and the connection engines touch —
//! `last_shout_time`, keep-alive deadlines, reconnect backoff, silence
//! GC — goes through a [`Clock`] rather than calling `Instant::now()`
//! directly, so tests can drive time without sleeping.

use std::sync::Arc;
use std::time::Instant;

/// A source of "now", in microseconds, relative to an arbitrary epoch
/// fixed at clock construction.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> i64;
}

/// Production clock: microseconds since this clock was constructed.
#[derive(Debug)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    #[must_use]
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }
}

/// Test clock: an explicit counter the test advances by hand.
#[derive(Debug)]
pub struct TestClock {
    now_us: std::sync::atomic::AtomicI64,
}

impl TestClock {
    #[must_use]
    pub fn new(start_us: i64) -> Arc<Self> {
        Arc::new(Self {
            now_us: std::sync::atomic::AtomicI64::new(start_us),
        })
    }

    pub fn advance_us(&self, delta_us: i64) {
        self.now_us.fetch_add(delta_us, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set_us(&self, value_us: i64) {
        self.now_us.store(value_us, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_us(&self) -> i64 {
        self.now_us.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_explicitly() {
        let clock = TestClock::new(1_000);
        assert_eq!(clock.now_us(), 1_000);
        clock.advance_us(500);
        assert_eq!(clock.now_us(), 1_500);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_us();
        let b = clock.now_us();
        assert!(b >= a);
    }
}
