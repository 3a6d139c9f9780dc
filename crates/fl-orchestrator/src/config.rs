//! Orchestrator configuration

use crate::error::OrchestratorError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default attempts per submission
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default delay before the first retry
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(2);

/// Default backoff growth factor
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default pause between rounds
pub const DEFAULT_INTER_ROUND_DELAY: Duration = Duration::from_secs(3);

/// Default bound on a single ledger call
pub const DEFAULT_PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default pause between client registrations
pub const DEFAULT_REGISTRATION_DELAY: Duration = Duration::from_secs(1);

/// What to do when a client's value may already be on the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResubmitPolicy {
    /// Submit unconditionally
    #[default]
    AlwaysSubmit,
    /// Ask the ledger first and skip clients already recorded for the round
    SkipIfRecorded,
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Attempts per submission before declaring terminal failure
    pub max_retries: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
    /// Growth factor applied per failed attempt
    pub backoff_multiplier: f64,
    /// Optional ceiling on a single backoff delay
    pub max_backoff: Option<Duration>,
    /// Pause after a round's reconciliation before the next round
    pub inter_round_delay: Duration,
    /// Bound on a single ledger call; expiry counts as a transient failure
    pub per_attempt_timeout: Duration,
    /// Pre-check behaviour for values that may already be recorded
    pub resubmit_policy: ResubmitPolicy,
    /// Upper bound on concurrent ledger calls (None = one per client)
    pub max_in_flight: Option<usize>,
    /// Pause between clients during registration
    pub registration_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_backoff: None,
            inter_round_delay: DEFAULT_INTER_ROUND_DELAY,
            per_attempt_timeout: DEFAULT_PER_ATTEMPT_TIMEOUT,
            resubmit_policy: ResubmitPolicy::default(),
            max_in_flight: None,
            registration_delay: DEFAULT_REGISTRATION_DELAY,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, multiplier: f64) -> Self {
        self.initial_backoff = initial;
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = Some(max_backoff);
        self
    }

    pub fn with_inter_round_delay(mut self, delay: Duration) -> Self {
        self.inter_round_delay = delay;
        self
    }

    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    pub fn with_resubmit_policy(mut self, policy: ResubmitPolicy) -> Self {
        self.resubmit_policy = policy;
        self
    }

    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit);
        self
    }

    pub fn with_registration_delay(mut self, delay: Duration) -> Self {
        self.registration_delay = delay;
        self
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.max_retries == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(OrchestratorError::InvalidConfig(format!(
                "backoff_multiplier must be finite and >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.per_attempt_timeout.is_zero() {
            return Err(OrchestratorError::InvalidConfig(
                "per_attempt_timeout must be non-zero".to_string(),
            ));
        }
        if let Some(max) = self.max_backoff {
            if max < self.initial_backoff {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "max_backoff ({:?}) is below initial_backoff ({:?})",
                    max, self.initial_backoff
                )));
            }
        }
        if self.max_in_flight == Some(0) {
            return Err(OrchestratorError::InvalidConfig(
                "max_in_flight must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.resubmit_policy, ResubmitPolicy::AlwaysSubmit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_retries() {
        let config = OrchestratorConfig::default().with_max_retries(0);
        assert!(matches!(
            config.validate(),
            Err(OrchestratorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_shrinking_backoff() {
        let config = OrchestratorConfig::default().with_backoff(Duration::from_millis(10), 0.5);
        assert!(config.validate().is_err());

        let config =
            OrchestratorConfig::default().with_backoff(Duration::from_millis(10), f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_cap_below_initial() {
        let config = OrchestratorConfig::default()
            .with_backoff(Duration::from_secs(2), 2.0)
            .with_max_backoff(Duration::from_secs(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_in_flight() {
        let config = OrchestratorConfig::default().with_max_in_flight(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resubmit_policy_serde() {
        let policy: ResubmitPolicy = serde_json::from_str("\"skip_if_recorded\"").unwrap();
        assert_eq!(policy, ResubmitPolicy::SkipIfRecorded);
    }
}
