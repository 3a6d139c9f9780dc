//! Round results

use crate::error::LedgerError;
use crate::reconcile::{reconcile, ExpectedClient, Reconciliation};
use crate::submission::{TaskReport, TaskState};
use chrono::{DateTime, Utc};
use fl_types::{Address, LedgerEntry, Round};
use serde::Serialize;
use std::time::Duration;

/// Why a client contributed no task to a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The value source had nothing for this client and round
    Missing,
    /// The value was not a finite number
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedClient {
    pub client_index: usize,
    pub address: Address,
    pub reason: SkipReason,
}

/// Per-round tallies; a degraded round shows here, not as an error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoundCounts {
    pub committed: usize,
    /// Fatal failures plus exhausted retries
    pub failed: usize,
    pub skipped: usize,
    pub already_recorded: usize,
    pub cancelled: usize,
}

impl RoundCounts {
    pub fn total(&self) -> usize {
        self.committed + self.failed + self.skipped + self.already_recorded + self.cancelled
    }
}

/// Terminal state of one client in a round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientOutcome {
    pub client_index: usize,
    pub address: Address,
    pub attempts: u32,
    #[serde(flatten)]
    pub state: TaskState,
}

/// Aggregate of one round; immutable once emitted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundResult {
    pub round: Round,
    pub counts: RoundCounts,
    pub outcomes: Vec<ClientOutcome>,
    pub skipped: Vec<SkippedClient>,
    /// None when the read-back failed
    pub reconciliation: Option<Reconciliation>,
    pub reconciliation_error: Option<String>,
    pub total_gas_used: u64,
    pub total_cost: f64,
    pub elapsed_ms: u64,
    /// Cancellation was requested while this round was in progress
    pub cancelled: bool,
    pub emitted_at: DateTime<Utc>,
}

impl RoundResult {
    /// Build a round's result from its task reports, skips and read-back
    pub fn assemble(
        round: Round,
        reports: &[TaskReport],
        skipped: Vec<SkippedClient>,
        read: Result<(Vec<LedgerEntry>, Duration), LedgerError>,
        elapsed: Duration,
        cancelled: bool,
    ) -> Self {
        let mut counts = RoundCounts {
            skipped: skipped.len(),
            ..Default::default()
        };
        let mut total_gas_used = 0u64;
        let mut total_cost = 0.0;

        for report in reports {
            match &report.state {
                TaskState::Committed { receipt } => {
                    counts.committed += 1;
                    total_gas_used = total_gas_used.saturating_add(receipt.gas_used);
                    total_cost += receipt.cost_estimate;
                }
                TaskState::FatalFailure { .. } | TaskState::RetriesExhausted { .. } => {
                    counts.failed += 1
                }
                TaskState::Cancelled => counts.cancelled += 1,
                TaskState::AlreadyRecorded => counts.already_recorded += 1,
            }
        }

        let (reconciliation, reconciliation_error) = match read {
            Ok((entries, latency)) => {
                let expected = expected_clients(reports, &skipped);
                (Some(reconcile(&expected, &entries, latency)), None)
            }
            Err(e) => (None, Some(e.to_string())),
        };

        let mut outcomes: Vec<ClientOutcome> = reports
            .iter()
            .map(|r| ClientOutcome {
                client_index: r.client_index,
                address: r.address.clone(),
                attempts: r.attempt_count(),
                state: r.state.clone(),
            })
            .collect();
        outcomes.sort_by_key(|o| o.client_index);

        Self {
            round,
            counts,
            outcomes,
            skipped,
            reconciliation,
            reconciliation_error,
            total_gas_used,
            total_cost,
            elapsed_ms: elapsed.as_millis() as u64,
            cancelled,
            emitted_at: Utc::now(),
        }
    }

    /// Failed or cancelled tasks, a failed read, or any flagged pairing
    pub fn is_degraded(&self) -> bool {
        self.counts.failed > 0
            || self.counts.cancelled > 0
            || self.reconciliation.is_none()
            || self.inconsistency_count() > 0
    }

    pub fn inconsistency_count(&self) -> usize {
        self.reconciliation
            .as_ref()
            .map(|r| r.inconsistencies().count())
            .unwrap_or(0)
    }

    pub fn outcome_for(&self, client_index: usize) -> Option<&ClientOutcome> {
        self.outcomes.iter().find(|o| o.client_index == client_index)
    }
}

fn expected_clients(reports: &[TaskReport], skipped: &[SkippedClient]) -> Vec<ExpectedClient> {
    let mut expected: Vec<ExpectedClient> = reports
        .iter()
        .map(|r| ExpectedClient {
            client_index: r.client_index,
            address: r.address.clone(),
            weight: Some(r.weight),
            expects_recorded: r.state.expects_recorded(),
        })
        .chain(skipped.iter().map(|s| ExpectedClient {
            client_index: s.client_index,
            address: s.address.clone(),
            weight: None,
            expects_recorded: false,
        }))
        .collect();
    expected.sort_by_key(|c| c.client_index);
    expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::ReconciliationStatus;
    use fl_types::{CommitReceipt, Weight};

    fn report(idx: usize, state: TaskState) -> TaskReport {
        TaskReport {
            round: 1,
            client_index: idx,
            address: Address::new(format!("client-{idx}")),
            weight: Weight::new(0.1 * (idx as f64 + 1.0)).unwrap(),
            state,
            attempts: Vec::new(),
        }
    }

    fn committed(gas: u64) -> TaskState {
        TaskState::Committed {
            receipt: CommitReceipt {
                gas_used: gas,
                cost_estimate: gas as f64 * 1e-9,
                latency: Duration::from_millis(4),
                receipt_id: format!("tx-{gas}"),
            },
        }
    }

    #[test]
    fn test_counts_and_totals() {
        let reports = vec![
            report(0, committed(50_000)),
            report(
                2,
                TaskState::RetriesExhausted {
                    last_reason: "busy".into(),
                },
            ),
            report(3, TaskState::Cancelled),
            report(4, committed(40_000)),
        ];
        let skipped = vec![SkippedClient {
            client_index: 1,
            address: Address::new("client-1"),
            reason: SkipReason::Missing,
        }];
        let entries = vec![
            LedgerEntry {
                address: Address::new("client-0"),
                weight: Weight::new(0.1).unwrap(),
            },
            LedgerEntry {
                address: Address::new("client-4"),
                weight: Weight::new(0.5).unwrap(),
            },
        ];

        let result = RoundResult::assemble(
            1,
            &reports,
            skipped,
            Ok((entries, Duration::from_millis(3))),
            Duration::from_millis(100),
            false,
        );

        assert_eq!(result.counts.committed, 2);
        assert_eq!(result.counts.failed, 1);
        assert_eq!(result.counts.skipped, 1);
        assert_eq!(result.counts.cancelled, 1);
        assert_eq!(result.counts.total(), 5);
        assert_eq!(result.total_gas_used, 90_000);
        let rec = result.reconciliation.as_ref().unwrap();
        assert_eq!(rec.count(ReconciliationStatus::Confirmed), 2);
        assert_eq!(rec.count(ReconciliationStatus::ExpectedAbsent), 3);
        // failure and cancellation degrade the round
        assert!(result.is_degraded());
    }

    #[test]
    fn test_failed_read_degrades_but_keeps_counts() {
        let reports = vec![report(0, committed(1))];
        let result = RoundResult::assemble(
            4,
            &reports,
            Vec::new(),
            Err(LedgerError::Unavailable("rpc down".into())),
            Duration::ZERO,
            false,
        );

        assert_eq!(result.counts.committed, 1);
        assert!(result.reconciliation.is_none());
        assert_eq!(
            result.reconciliation_error.as_deref(),
            Some("Ledger unavailable: rpc down")
        );
        assert!(result.is_degraded());
    }

    #[test]
    fn test_healthy_round() {
        let reports = vec![report(0, committed(1))];
        let entries = vec![LedgerEntry {
            address: Address::new("client-0"),
            weight: Weight::new(0.1).unwrap(),
        }];
        let result = RoundResult::assemble(
            2,
            &reports,
            Vec::new(),
            Ok((entries, Duration::ZERO)),
            Duration::ZERO,
            false,
        );
        assert!(!result.is_degraded());
        assert_eq!(result.outcome_for(0).unwrap().attempts, 0);
    }
}
