//! Exponential backoff with jitter, used by the driver's restart policy
//! (spec §4.5 / §6 `restartBackoff.*`).
//!
//! Adapted from the teacher's `convex_sync_types::backoff::Backoff` idiom,
//! extended with a bounded restart counter (`max_restarts`, `-1` for
//! unbounded, `0` to disable restarts entirely) per spec §4.5.

use std::{cmp, time::Duration};

use rand::Rng;

/// `-1` means unbounded restarts.
pub const UNBOUNDED_RESTARTS: i64 = -1;

#[derive(Debug, Clone, Copy)]
pub struct RestartBackoff {
    min_backoff: Duration,
    max_backoff: Duration,
    random_factor: f64,
    max_restarts: i64,
    num_failures: u32,
    restarts_used: u64,
}

impl RestartBackoff {
    pub fn new(
        min_backoff: Duration,
        max_backoff: Duration,
        random_factor: f64,
        max_restarts: i64,
    ) -> Self {
        Self {
            min_backoff,
            max_backoff,
            random_factor,
            max_restarts,
            num_failures: 0,
            restarts_used: 0,
        }
    }

    pub fn reset(&mut self) {
        self.num_failures = 0;
    }

    /// Whether another restart is permitted given `max_restarts`.
    pub fn restarts_exhausted(&self) -> bool {
        self.max_restarts != UNBOUNDED_RESTARTS && self.restarts_used >= self.max_restarts as u64
    }

    /// Computes the next backoff duration and records a restart attempt.
    /// Panics if called after [`RestartBackoff::restarts_exhausted`] — callers
    /// must check that first, since attempting a disallowed restart is a
    /// driver bug rather than a recoverable condition.
    pub fn next_delay(&mut self, rng: &mut impl Rng) -> Duration {
        assert!(
            !self.restarts_exhausted(),
            "next_delay called after restarts were exhausted"
        );
        // See https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/
        let p = 2u32.checked_pow(self.num_failures).unwrap_or(u32::MAX);
        self.num_failures += 1;
        self.restarts_used += 1;
        let base = self.min_backoff.checked_mul(p).unwrap_or(self.max_backoff);
        let capped = cmp::min(base, self.max_backoff);
        let jitter = 1.0 + rng.gen::<f64>() * self.random_factor;
        capped.mul_f64(jitter)
    }

    pub fn failures(&self) -> u32 {
        self.num_failures
    }

    pub fn restarts_used(&self) -> u64 {
        self.restarts_used
    }
}
