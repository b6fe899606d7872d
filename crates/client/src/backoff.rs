// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnect scheduling: pure `attempt -> delay` state, no timers.
//!
//! The connection manager owns the actual sleep; keeping the schedule pure
//! lets the backoff properties be unit-tested without wall-clock waits.

use std::time::Duration;

/// Capped exponential backoff with a bounded attempt budget.
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    attempt: u32,
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    jitter: bool,
}

impl ReconnectSchedule {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self { attempt: 0, base_delay, max_delay, max_attempts, jitter: false }
    }

    /// Enable ±20% jitter on returned delays.
    ///
    /// Consecutive delays grow 2x while the jitter spread is at most 1.5x
    /// (1.2/0.8), so the non-decreasing-until-cap property is preserved.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the next reconnect attempt: `min(base * 2^attempt, max)`.
    /// Increments the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32.checked_shl(self.attempt).unwrap_or(u32::MAX));
        let delay = exp.min(self.max_delay);
        self.attempt = self.attempt.saturating_add(1);
        if self.jitter {
            jittered(delay)
        } else {
            delay
        }
    }

    /// True once the attempt budget is spent; no further automatic
    /// reconnects may be scheduled.
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Zero the attempt counter. Called only after a successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Scale `delay` by a uniform factor in [0.8, 1.2].
fn jittered(delay: Duration) -> Duration {
    use rand::Rng;
    let factor = rand::rng().random_range(0.8..=1.2);
    delay.mul_f64(factor)
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
