//! Capped exponential backoff with jitter

use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay generator for consecutive failures
///
/// Attempt `n` waits `base * 2^n` plus up to half of that again as jitter,
/// capped at `max`. Because the next attempt's floor is twice this one's,
/// delays never decrease until [`Backoff::reset`].
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        let base_ms = base_ms.max(1);
        Self {
            base_ms,
            max_ms: max_ms.max(base_ms),
            attempt: 0,
        }
    }

    /// Delay for the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u64.checked_shl(self.attempt).unwrap_or(u64::MAX);
        let exp_ms = self.base_ms.saturating_mul(factor);
        self.attempt = self.attempt.saturating_add(1).min(63);

        if exp_ms >= self.max_ms {
            return Duration::from_millis(self.max_ms);
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=exp_ms / 2);
        Duration::from_millis(exp_ms.saturating_add(jitter_ms).min(self.max_ms))
    }

    /// Consecutive failures seen since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

/// Sleep for `delay` unless cancelled first; `false` when cancelled
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
