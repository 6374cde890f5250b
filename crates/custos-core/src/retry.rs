//! Backoff policy for chain head conflicts.
//!
//! A conflict means another writer (usually another process sharing the
//! same database) advanced the head between our read and our commit.  The
//! engine waits and rebuilds the event against the fresh head:
//!
//! - delay = initial_delay * 2^step, capped at max_delay
//! - down-jitter: multiplied by a random factor in [1 - jitter_factor, 1.0]
//! - at most `max_retries` retries after the first attempt

use std::time::Duration;

use custos_contracts::config::ChainConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &ChainConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// Delay before retry number `backoff_step + 1` (0 before the first retry).
    pub fn delay(&self, backoff_step: u32) -> Duration {
        let exp = 2.0_f64.powi(backoff_step.min(30) as i32);
        let base = self.initial_delay.as_secs_f64() * exp;
        let capped = base.min(self.max_delay.as_secs_f64());

        let jitter = 1.0 - rand::random::<f64>() * self.jitter_factor;
        Duration::from_secs_f64(capped * jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ChainConfig::default())
    }
}
