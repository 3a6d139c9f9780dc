//! Retry policy - exponential backoff for ledger writes

use crate::config::OrchestratorConfig;
use fl_types::TransactionOutcome;
use std::time::Duration;

/// Decides whether and when a failed attempt is re-tried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    initial_backoff: Duration,
    multiplier: f64,
    max_backoff: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(initial_backoff: Duration, multiplier: f64) -> Self {
        Self {
            initial_backoff,
            multiplier,
            max_backoff: None,
        }
    }

    /// Clamp every delay to `max_backoff`
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = Some(max_backoff);
        self
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            initial_backoff: config.initial_backoff,
            multiplier: config.backoff_multiplier,
            max_backoff: config.max_backoff,
        }
    }

    /// Delay to wait after failed attempt `attempt_number` (1-indexed):
    /// `initial_backoff * multiplier^(attempt_number - 1)`
    pub fn next_delay(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.initial_backoff.as_nanos() as f64 * self.multiplier.powi(exponent);

        match self.max_backoff {
            Some(max) if !(nanos < max.as_nanos() as f64) => max,
            _ if nanos.is_finite() && nanos < u64::MAX as f64 => {
                Duration::from_nanos(nanos.round() as u64)
            }
            _ => Duration::MAX,
        }
    }

    /// True iff the outcome is transient and budget remains
    pub fn should_retry(
        &self,
        outcome: &TransactionOutcome,
        attempt_number: u32,
        max_retries: u32,
    ) -> bool {
        outcome.is_transient() && attempt_number < max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}
