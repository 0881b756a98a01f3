//! Exponential backoff with full jitter.
//!
//! `delay = random(0, min(cap, base * 2^attempt))`.

use std::time::Duration;

/// Exponential backoff calculator with full jitter.
///
/// One instance tracks one retry sequence: the dispatcher creates one per
/// request descriptor, the gateway keeps one per shard and resets it after
/// every successful handshake.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    /// Current attempt number (0-indexed).
    attempt: u32,
}

impl Backoff {
    /// Create a new backoff calculator.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base_ms: u64::try_from(base.as_millis()).unwrap_or(u64::MAX),
            max_ms: u64::try_from(max.as_millis()).unwrap_or(u64::MAX),
            attempt: 0,
        }
    }

    /// Compute the next delay with full jitter and advance the attempt.
    pub fn next_delay(&mut self) -> Duration {
        let jittered = fastrand::u64(0..=self.ceiling_ms());
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(jittered)
    }

    /// Upper bound of the delay the next call to [`next_delay`](Self::next_delay)
    /// can return.
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(self.ceiling_ms())
    }

    /// Number of delays handed out since creation or the last reset.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reset the attempt counter after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    fn ceiling_ms(&self) -> u64 {
        let exp = self
            .base_ms
            .saturating_mul(1u64.checked_shl(self.attempt).unwrap_or(u64::MAX));
        exp.min(self.max_ms)
    }
}
