//! Reputation updates - after a round is reconciled, its confirmed values
//! are sent to the score registry in one coordinator transaction

use crate::attempt::{timeout_reason, AttemptDriver, Resolution};
use crate::ledger::ScoreRegistry;
use crate::reconcile::ReconciliationStatus;
use crate::round::RoundResult;
use crate::submission::TaskContext;
use chrono::{DateTime, Utc};
use fl_types::{Address, LedgerEntry, ReputationScore, Round, TransactionOutcome};
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreUpdateStatus {
    Committed,
    Failed,
    Cancelled,
    /// Nothing to score: the read-back failed or no value was confirmed
    Skipped,
}

/// Outcome of one round's score update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreUpdateRecord {
    pub round: Round,
    pub status: ScoreUpdateStatus,
    /// Values carried by the transaction
    pub clients: usize,
    pub attempts: u32,
    pub gas_used: Option<u64>,
    pub cost_estimate: Option<f64>,
    pub gas_price_gwei: Option<f64>,
    pub receipt_id: Option<String>,
    /// Wall time of the update, retries and score read included
    pub latency_ms: u64,
    /// Scores read back after a committed update
    pub scores: Vec<ReputationScore>,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ScoreUpdateRecord {
    fn new(round: Round, status: ScoreUpdateStatus, clients: usize) -> Self {
        Self {
            round,
            status,
            clients,
            attempts: 0,
            gas_used: None,
            cost_estimate: None,
            gas_price_gwei: None,
            receipt_id: None,
            latency_ms: 0,
            scores: Vec::new(),
            reason: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.status == ScoreUpdateStatus::Committed
    }

    pub fn score_for(&self, address: &Address) -> Option<f64> {
        self.scores
            .iter()
            .find(|s| &s.address == address)
            .map(|s| s.score)
    }
}

/// Values confirmed on the ledger this round, in client order
pub fn confirmed_entries(result: &RoundResult) -> Vec<LedgerEntry> {
    result
        .reconciliation
        .iter()
        .flat_map(|r| r.entries.iter())
        .filter(|e| e.status == ReconciliationStatus::Confirmed)
        .filter_map(|e| {
            e.recorded.map(|weight| LedgerEntry {
                address: e.address.clone(),
                weight,
            })
        })
        .collect()
}

/// Send one round's confirmed values to `registry` and read the new scores
pub(crate) async fn update_round_scores(
    registry: &dyn ScoreRegistry,
    ctx: &TaskContext,
    result: &RoundResult,
) -> ScoreUpdateRecord {
    let round = result.round;
    let entries = confirmed_entries(result);
    let mut record = ScoreUpdateRecord::new(round, ScoreUpdateStatus::Skipped, entries.len());

    if ctx.cancel.is_cancelled() {
        record.status = ScoreUpdateStatus::Cancelled;
        return record;
    }
    if result.reconciliation.is_none() {
        record.reason = Some("round read-back failed".to_string());
        return record;
    }
    if entries.is_empty() {
        record.reason = Some("no confirmed weights".to_string());
        return record;
    }

    let started = Instant::now();
    let driver = AttemptDriver {
        policy: &ctx.policy,
        max_retries: ctx.max_retries,
        timeout: ctx.timeout,
        cancel: &ctx.cancel,
        limiter: None,
    };
    let traces = driver
        .drive(|| registry.update_scores(round, &entries))
        .await;
    record.attempts = traces.last().map(|t| t.attempt_number).unwrap_or(0);

    match traces.last().map(|t| &t.resolution) {
        Some(Resolution::Outcome(TransactionOutcome::Committed(receipt))) => {
            record.status = ScoreUpdateStatus::Committed;
            record.gas_used = Some(receipt.gas_used);
            record.cost_estimate = Some(receipt.cost_estimate);
            record.receipt_id = Some(receipt.receipt_id.clone());
            if receipt.gas_used > 0 {
                let gwei = receipt.cost_estimate / receipt.gas_used as f64 * 1e9;
                record.gas_price_gwei = Some(gwei);
            }

            let addresses: Vec<Address> = entries.iter().map(|e| e.address.clone()).collect();
            let read = tokio::time::timeout(ctx.timeout, registry.reputation_scores(&addresses));
            match read.await {
                Ok(Ok(scores)) => record.scores = scores,
                Ok(Err(e)) => record.reason = Some(format!("reading scores failed: {e}")),
                Err(_) => {
                    record.reason = Some(format!("reading scores {}", timeout_reason(ctx.timeout)))
                }
            }
        }
        Some(Resolution::Outcome(outcome)) => {
            record.status = ScoreUpdateStatus::Failed;
            record.reason = outcome.reason().map(str::to_string);
        }
        Some(Resolution::TimedOut(after)) => {
            record.status = ScoreUpdateStatus::Failed;
            record.reason = Some(timeout_reason(*after));
        }
        Some(Resolution::Panicked(reason)) => {
            record.status = ScoreUpdateStatus::Failed;
            record.reason = Some(reason.clone());
        }
        Some(Resolution::Cancelled) | None => record.status = ScoreUpdateStatus::Cancelled,
    }

    record.latency_ms = started.elapsed().as_millis() as u64;
    record.recorded_at = Utc::now();

    match record.status {
        ScoreUpdateStatus::Committed => tracing::info!(
            "--- Round {} --- Scores updated for {} clients (gas {})",
            round,
            record.clients,
            record.gas_used.unwrap_or_default()
        ),
        _ => tracing::error!(
            "Error updating scores for round {}: {}",
            round,
            record.reason.as_deref().unwrap_or("cancelled")
        ),
    }

    record
}
