//! Run configuration file

use anyhow::{Context, Result};
use fl_orchestrator::config::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_BACKOFF, DEFAULT_INTER_ROUND_DELAY,
    DEFAULT_MAX_RETRIES, DEFAULT_PER_ATTEMPT_TIMEOUT, DEFAULT_REGISTRATION_DELAY,
};
use fl_orchestrator::{OrchestratorConfig, ResubmitPolicy};
use fl_types::Round;
use ledger_bridge::FaultProfile;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Everything a run needs besides keys and weights
///
/// Every field is optional in the file; missing ones take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub start_round: Round,
    pub end_round: Round,
    /// Clients to generate when no keys file is given
    pub clients: usize,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: Option<u64>,
    pub inter_round_delay_ms: u64,
    pub per_attempt_timeout_ms: u64,
    pub resubmit_policy: ResubmitPolicy,
    pub max_in_flight: Option<usize>,
    /// Register clients before the first round
    pub register_clients: bool,
    pub registration_delay_ms: u64,
    /// Update reputation scores after every round
    pub update_scores: bool,
    /// Simulated ledger behaviour
    pub ledger: FaultProfile,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            start_round: 1,
            end_round: 50,
            clients: 10,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF.as_millis() as u64,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_backoff_ms: None,
            inter_round_delay_ms: DEFAULT_INTER_ROUND_DELAY.as_millis() as u64,
            per_attempt_timeout_ms: DEFAULT_PER_ATTEMPT_TIMEOUT.as_millis() as u64,
            resubmit_policy: ResubmitPolicy::default(),
            max_in_flight: None,
            register_clients: false,
            registration_delay_ms: DEFAULT_REGISTRATION_DELAY.as_millis() as u64,
            update_scores: false,
            ledger: FaultProfile::default(),
        }
    }
}

impl RunConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default()
            .with_max_retries(self.max_retries)
            .with_backoff(
                Duration::from_millis(self.initial_backoff_ms),
                self.backoff_multiplier,
            )
            .with_inter_round_delay(Duration::from_millis(self.inter_round_delay_ms))
            .with_per_attempt_timeout(Duration::from_millis(self.per_attempt_timeout_ms))
            .with_resubmit_policy(self.resubmit_policy)
            .with_registration_delay(Duration::from_millis(self.registration_delay_ms));

        if let Some(ms) = self.max_backoff_ms {
            config = config.with_max_backoff(Duration::from_millis(ms));
        }
        if let Some(limit) = self.max_in_flight {
            config = config.with_max_in_flight(limit);
        }
        config
    }
}
