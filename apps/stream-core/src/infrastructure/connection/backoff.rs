//! Reconnect Backoff
//!
//! Capped exponential delay between reconnect attempts. The delay for the
//! next attempt is `min(initial * 2^attempts, max)`; the attempt counter
//! advances when the retry timer fires, not when the delay is computed,
//! so repeated reads of the next delay are idempotent. A successful
//! connection resets the counter.

use std::time::Duration;

/// Tuning for [`Backoff`].
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Random fraction of the delay added on top (0.0 disables jitter).
    pub jitter_factor: f64,
    /// Give up after this many attempts; 0 retries forever.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }
}

/// Attempt counter plus delay schedule.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    /// Create a fresh backoff at attempt zero.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` when the attempt budget is
    /// exhausted.
    #[must_use]
    pub fn next_delay(&self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts {
            return None;
        }

        let initial_ms = self.config.initial_delay.as_millis();
        let max_ms = self.config.max_delay.as_millis();
        let scaled = 2u128
            .checked_pow(self.attempts)
            .and_then(|factor| initial_ms.checked_mul(factor))
            .unwrap_or(max_ms);
        let capped = scaled.min(max_ms);

        let mut delay_ms = u64::try_from(capped).unwrap_or(u64::MAX);
        if self.config.jitter_factor > 0.0 {
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let jitter =
                (delay_ms as f64 * self.config.jitter_factor * rand::random::<f64>()) as u64;
            delay_ms = delay_ms.saturating_add(jitter);
        }

        Some(Duration::from_millis(delay_ms))
    }

    /// Advance the attempt counter. Called when the retry timer fires.
    pub fn advance(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Reset to attempt zero after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Retries attempted since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}
