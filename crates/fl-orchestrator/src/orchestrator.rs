//! Submission orchestrator - drives rounds of client weight submissions
//!
//! Rounds run strictly in sequence. Within a round every client with a value
//! gets its own task; the orchestrator waits for all of them, reads the
//! round back from the ledger once, optionally updates reputation scores from
//! the confirmed values, emits the round's records and only then moves on.

use crate::config::OrchestratorConfig;
use crate::error::{LedgerError, OrchestratorError};
use crate::ledger::{LedgerClient, ScoreRegistry};
use crate::metrics::{MetricsRecord, MetricsSink};
use crate::reputation::{update_round_scores, ScoreUpdateRecord};
use crate::retry::RetryPolicy;
use crate::round::{RoundResult, SkipReason, SkippedClient};
use crate::source::ValueSource;
use crate::submission::{fan_out, SubmissionTask, TaskContext, TaskReport};
use fl_types::{ClientIdentity, LedgerEntry, Round, Weight};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Results of a run, in round order
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub rounds: Vec<RoundResult>,
    /// One per round when a score registry is attached
    pub score_updates: Vec<ScoreUpdateRecord>,
    /// The run stopped before its last round finished because cancellation
    /// was requested
    pub cancelled: bool,
}

impl RunSummary {
    pub fn committed(&self) -> usize {
        self.rounds.iter().map(|r| r.counts.committed).sum()
    }

    pub fn failed(&self) -> usize {
        self.rounds.iter().map(|r| r.counts.failed).sum()
    }

    pub fn degraded_rounds(&self) -> usize {
        self.rounds.iter().filter(|r| r.is_degraded()).count()
    }

    pub fn total_gas_used(&self) -> u64 {
        self.rounds.iter().map(|r| r.total_gas_used).sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.rounds.iter().map(|r| r.total_cost).sum()
    }

    pub fn score_gas_used(&self) -> u64 {
        self.score_updates
            .iter()
            .filter_map(|u| u.gas_used)
            .sum()
    }
}

/// Drives submissions round after round
pub struct SubmissionOrchestrator {
    ledger: Arc<dyn LedgerClient>,
    sink: Arc<dyn MetricsSink>,
    config: OrchestratorConfig,
    cancel: CancellationToken,
    scores: Option<Arc<dyn ScoreRegistry>>,
}

impl SubmissionOrchestrator {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        sink: Arc<dyn MetricsSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            sink,
            config,
            cancel: CancellationToken::new(),
            scores: None,
        }
    }

    /// Update reputation scores after every reconciled round
    pub fn with_score_registry(mut self, registry: Arc<dyn ScoreRegistry>) -> Self {
        self.scores = Some(registry);
        self
    }

    /// Use a caller-owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the run after the in-progress round
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run rounds `start_round..=end_round`
    ///
    /// Fails only on configuration errors, before any round starts: an empty
    /// or duplicated client list, a bad round range or invalid settings.
    /// Client failures, failed reads and cancellation all end up in the
    /// returned summary and the metrics stream.
    pub async fn run_rounds(
        &self,
        start_round: Round,
        end_round: Round,
        clients: &[ClientIdentity],
        values: &dyn ValueSource,
    ) -> Result<RunSummary, OrchestratorError> {
        check_clients(clients)?;
        if start_round == 0 || start_round > end_round {
            return Err(OrchestratorError::InvalidRoundRange {
                start: start_round,
                end: end_round,
            });
        }
        self.config.validate()?;

        let ctx = Arc::new(TaskContext {
            ledger: self.ledger.clone(),
            policy: RetryPolicy::from_config(&self.config),
            max_retries: self.config.max_retries,
            timeout: self.config.per_attempt_timeout,
            resubmit_policy: self.config.resubmit_policy,
            cancel: self.cancel.clone(),
            limiter: self
                .config
                .max_in_flight
                .map(|limit| Arc::new(Semaphore::new(limit))),
        });

        tracing::info!(
            "Running rounds {}..={} for {} clients (max_retries={}, timeout={}ms)",
            start_round,
            end_round,
            clients.len(),
            self.config.max_retries,
            self.config.per_attempt_timeout.as_millis()
        );

        let mut summary = RunSummary::default();

        for round in start_round..=end_round {
            if self.cancel.is_cancelled() {
                tracing::info!("Cancellation requested, not starting round {}", round);
                summary.cancelled = true;
                break;
            }

            let (result, score_update) = self.run_round(&ctx, round, clients, values).await;
            let interrupted = result.cancelled;
            summary.rounds.push(result);
            summary.score_updates.extend(score_update);

            if interrupted {
                tracing::info!("Cancellation requested, stopping after round {}", round);
                summary.cancelled = true;
                break;
            }

            if round < end_round && !self.pace().await {
                summary.cancelled = true;
                break;
            }
        }

        Ok(summary)
    }

    async fn run_round(
        &self,
        ctx: &Arc<TaskContext>,
        round: Round,
        clients: &[ClientIdentity],
        values: &dyn ValueSource,
    ) -> (RoundResult, Option<ScoreUpdateRecord>) {
        let started = Instant::now();
        tracing::info!("--- Round {} --- Starting", round);

        let (tasks, skipped) = resolve_tasks(round, clients, values);
        for skip in &skipped {
            tracing::warn!(
                "Weight data {:?} for round {}, index {} ({}), skipping",
                skip.reason,
                round,
                skip.client_index,
                skip.address.short()
            );
        }

        let reports = fan_out(ctx.clone(), tasks).await;
        tracing::info!(
            "--- Round {} --- Submission completed ({} tasks)",
            round,
            reports.len()
        );

        let read = self.read_round(round).await;
        let result = RoundResult::assemble(
            round,
            &reports,
            skipped,
            read,
            started.elapsed(),
            self.cancel.is_cancelled(),
        );

        let score_update = match &self.scores {
            Some(registry) => Some(update_round_scores(registry.as_ref(), ctx, &result).await),
            None => None,
        };

        self.emit(reports, &result, score_update.as_ref());
        (result, score_update)
    }

    /// One bounded read of the round's committed state
    async fn read_round(&self, round: Round) -> Result<(Vec<LedgerEntry>, Duration), LedgerError> {
        let started = Instant::now();
        let timeout = self.config.per_attempt_timeout;

        match tokio::time::timeout(timeout, self.ledger.read_round_state(round)).await {
            Ok(Ok(entries)) => {
                tracing::info!(
                    "--- Round {} --- Read completed ({} entries)",
                    round,
                    entries.len()
                );
                Ok((entries, started.elapsed()))
            }
            Ok(Err(e)) => {
                tracing::error!("Error reading weights for round {}: {}", round, e);
                Err(e)
            }
            Err(_) => {
                tracing::error!("Reading weights for round {} timed out", round);
                Err(LedgerError::Timeout(timeout))
            }
        }
    }

    /// Attempts in client order, the round itself, then its score update
    fn emit(
        &self,
        reports: Vec<TaskReport>,
        result: &RoundResult,
        score_update: Option<&ScoreUpdateRecord>,
    ) {
        for report in reports {
            for attempt in report.attempts {
                self.sink.record(MetricsRecord::Attempt(attempt));
            }
        }
        self.sink.record(MetricsRecord::Round(result.clone()));
        if let Some(update) = score_update {
            self.sink.record(MetricsRecord::ScoreUpdate(update.clone()));
        }
    }

    /// Inter-round delay; false if cancelled while waiting
    async fn pace(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::info!("Cancellation requested during inter-round delay");
                false
            }
            _ = tokio::time::sleep(self.config.inter_round_delay) => true,
        }
    }
}

/// Convenience entry point for a one-off run without external cancellation
pub async fn run_rounds(
    start_round: Round,
    end_round: Round,
    clients: &[ClientIdentity],
    values: &dyn ValueSource,
    ledger: Arc<dyn LedgerClient>,
    sink: Arc<dyn MetricsSink>,
    config: OrchestratorConfig,
) -> Result<RunSummary, OrchestratorError> {
    SubmissionOrchestrator::new(ledger, sink, config)
        .run_rounds(start_round, end_round, clients, values)
        .await
}

/// Non-empty, and no address twice; reconciliation pairs by address
pub(crate) fn check_clients(clients: &[ClientIdentity]) -> Result<(), OrchestratorError> {
    if clients.is_empty() {
        return Err(OrchestratorError::EmptyClientList);
    }
    let mut seen = HashSet::with_capacity(clients.len());
    for identity in clients {
        if !seen.insert(&identity.address) {
            return Err(OrchestratorError::DuplicateClient(identity.address.clone()));
        }
    }
    Ok(())
}

fn resolve_tasks(
    round: Round,
    clients: &[ClientIdentity],
    values: &dyn ValueSource,
) -> (Vec<SubmissionTask>, Vec<SkippedClient>) {
    let mut tasks = Vec::with_capacity(clients.len());
    let mut skipped = Vec::new();

    for (client_index, identity) in clients.iter().enumerate() {
        let reason = match values.value_for(round, client_index).map(Weight::new) {
            Some(Some(weight)) => {
                tasks.push(SubmissionTask {
                    round,
                    client_index,
                    identity: identity.clone(),
                    weight,
                });
                continue;
            }
            Some(None) => SkipReason::Invalid,
            None => SkipReason::Missing,
        };

        skipped.push(SkippedClient {
            client_index,
            address: identity.address.clone(),
            reason,
        });
    }

    (tasks, skipped)
}
