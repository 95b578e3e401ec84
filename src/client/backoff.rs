//! Reconnect backoff schedule (spec.md §4.3 "Backoff", §8 invariants).

/// First retry after a failure waits this long, then doubles.
pub const INITIAL_BACKOFF_US: i64 = 16_000_000;
/// Delay never exceeds this.
pub const MAX_BACKOFF_US: i64 = 512_000_000;
/// A connection that stayed up this long after `PLAYER_ID` counts as
/// "stable"; its next failure resets the delay to zero.
pub const STABLE_THRESHOLD_US: i64 = 15_000_000;

/// Tracks the exponential-backoff delay between reconnect attempts.
/// The very first connect attempt is always immediate (`current_us()`
/// starts at 0); each subsequent failure doubles the delay starting at
/// [`INITIAL_BACKOFF_US`], capped at [`MAX_BACKOFF_US`], unless the prior
/// connection was stable, in which case it resets to zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct Backoff {
    current_us: i64,
}

impl Backoff {
    #[must_use]
    pub fn new() -> Self {
        Self { current_us: 0 }
    }

    #[must_use]
    pub fn current_us(&self) -> i64 {
        self.current_us
    }

    /// Records a connection failure and returns the delay before the next
    /// retry.
    pub fn on_failure(&mut self, was_stable: bool) -> i64 {
        self.current_us = if was_stable {
            0
        } else if self.current_us == 0 {
            INITIAL_BACKOFF_US
        } else {
            (self.current_us * 2).min(MAX_BACKOFF_US)
        };
        self.current_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_immediate_failures_double_then_cap() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.current_us(), 0);

        let expected = [
            16_000_000,
            32_000_000,
            64_000_000,
            128_000_000,
            256_000_000,
            512_000_000,
            512_000_000,
            512_000_000,
        ];
        for &delay in &expected {
            assert_eq!(backoff.on_failure(false), delay);
        }
    }

    #[test]
    fn stable_connection_resets_backoff_to_zero() {
        let mut backoff = Backoff::new();
        backoff.on_failure(false);
        backoff.on_failure(false);
        assert!(backoff.current_us() > 0);

        assert_eq!(backoff.on_failure(true), 0);
        assert_eq!(backoff.on_failure(false), INITIAL_BACKOFF_US);
    }
}
