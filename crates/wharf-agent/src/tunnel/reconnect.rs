//! Exponential backoff for rejoining the cluster

use std::time::Duration;

use wharf_core::config::BackoffConfig;

/// Exponential backoff between join attempts.
///
/// Owned by the supervisor's discovery phase; a successful join resets it.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay handed out after a reset
    initial: Duration,
    /// Current delay
    current: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
}

impl ExponentialBackoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier)
    }

    /// Create a new backoff with custom parameters
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            current: initial,
            max,
            multiplier,
        }
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        // Saturates at the ceiling instead of overflowing
        let next = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max);
        self.current = std::cmp::min(next, self.max);

        delay
    }

    /// Delay the next failure would wait
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Reset the backoff to its initial delay
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}
