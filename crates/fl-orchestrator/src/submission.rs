//! Submission tasks and the per-round fan-out / barrier

use crate::attempt::{timeout_reason, AttemptDriver, AttemptTrace, Resolution};
use crate::config::ResubmitPolicy;
use crate::ledger::LedgerClient;
use crate::metrics::{AttemptRecord, AttemptStatus};
use crate::retry::RetryPolicy;
use chrono::Utc;
use fl_types::{
    Address, ClientIdentity, CommitReceipt, Round, Submission, TransactionOutcome, Weight,
};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// One client's write for one round
#[derive(Debug, Clone)]
pub struct SubmissionTask {
    pub round: Round,
    pub client_index: usize,
    pub identity: ClientIdentity,
    pub weight: Weight,
}

impl SubmissionTask {
    pub fn submission(&self) -> Submission {
        Submission {
            round: self.round,
            client_index: self.client_index,
            address: self.identity.address.clone(),
            weight: self.weight,
        }
    }
}

/// Terminal state of a submission task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Committed { receipt: CommitReceipt },
    FatalFailure { reason: String },
    RetriesExhausted { last_reason: String },
    Cancelled,
    /// Pre-check found the weight already on the ledger; nothing was sent
    AlreadyRecorded,
}

impl TaskState {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            Self::FatalFailure { .. } | Self::RetriesExhausted { .. }
        )
    }

    /// Whether the client's weight is expected on the ledger after this state
    pub fn expects_recorded(&self) -> bool {
        matches!(self, Self::Committed { .. } | Self::AlreadyRecorded)
    }
}

/// Outcome of one task: its terminal state and every attempt it made
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub round: Round,
    pub client_index: usize,
    pub address: Address,
    pub weight: Weight,
    pub state: TaskState,
    pub attempts: Vec<AttemptRecord>,
}

impl TaskReport {
    /// Number of attempts that reached (or tried to reach) the ledger
    pub fn attempt_count(&self) -> u32 {
        self.attempts.last().map(|a| a.attempt_number).unwrap_or(0)
    }
}

/// Shared, read-only state for every task of a round
pub(crate) struct TaskContext {
    pub ledger: Arc<dyn LedgerClient>,
    pub policy: RetryPolicy,
    pub max_retries: u32,
    pub timeout: Duration,
    pub resubmit_policy: ResubmitPolicy,
    pub cancel: CancellationToken,
    pub limiter: Option<Arc<Semaphore>>,
}

/// Run every task concurrently and wait for all of them
///
/// Reports come back in input order. A task that panics still yields a
/// report, so the barrier never loses a client.
pub(crate) async fn fan_out(ctx: Arc<TaskContext>, tasks: Vec<SubmissionTask>) -> Vec<TaskReport> {
    let (keys, handles): (Vec<_>, Vec<_>) = tasks
        .into_iter()
        .map(|task| {
            let key = (
                task.round,
                task.client_index,
                task.identity.address.clone(),
                task.weight,
            );
            (key, tokio::spawn(run_task(ctx.clone(), task)))
        })
        .unzip();

    join_all(handles)
        .await
        .into_iter()
        .zip(keys)
        .map(|(joined, (round, client_index, address, weight))| match joined {
            Ok(report) => report,
            Err(e) => lost_task_report(round, client_index, address, weight, e),
        })
        .collect()
}

async fn run_task(ctx: Arc<TaskContext>, task: SubmissionTask) -> TaskReport {
    let submission = task.submission();

    if ctx.resubmit_policy == ResubmitPolicy::SkipIfRecorded && already_recorded(&ctx, &task).await
    {
        tracing::debug!(
            "Round {}: {} already recorded, not resubmitting",
            task.round,
            task.identity.address.short()
        );
        return TaskReport {
            round: task.round,
            client_index: task.client_index,
            address: submission.address,
            weight: task.weight,
            state: TaskState::AlreadyRecorded,
            attempts: Vec::new(),
        };
    }

    let driver = AttemptDriver {
        policy: &ctx.policy,
        max_retries: ctx.max_retries,
        timeout: ctx.timeout,
        cancel: &ctx.cancel,
        limiter: ctx.limiter.as_deref(),
    };
    let traces = driver
        .drive(|| ctx.ledger.submit(&task.identity, &submission))
        .await;

    let state = terminal_state(&traces);
    let attempts = traces
        .iter()
        .enumerate()
        .map(|(i, trace)| attempt_record(&submission, trace, i + 1 == traces.len()))
        .collect();

    TaskReport {
        round: task.round,
        client_index: task.client_index,
        address: submission.address,
        weight: task.weight,
        state,
        attempts,
    }
}

/// Pre-check for `SkipIfRecorded`; any error falls back to submitting
async fn already_recorded(ctx: &TaskContext, task: &SubmissionTask) -> bool {
    let address = &task.identity.address;
    let check = tokio::time::timeout(ctx.timeout, ctx.ledger.has_submitted(task.round, address));
    match check.await {
        Ok(Ok(recorded)) => recorded,
        Ok(Err(e)) => {
            tracing::warn!(
                "Round {}: pre-check for {} failed, submitting anyway: {}",
                task.round,
                address.short(),
                e
            );
            false
        }
        Err(_) => {
            tracing::warn!(
                "Round {}: pre-check for {} timed out, submitting anyway",
                task.round,
                address.short()
            );
            false
        }
    }
}

fn terminal_state(traces: &[AttemptTrace]) -> TaskState {
    match traces.last().map(|t| &t.resolution) {
        Some(Resolution::Outcome(TransactionOutcome::Committed(receipt))) => TaskState::Committed {
            receipt: receipt.clone(),
        },
        Some(Resolution::Outcome(TransactionOutcome::FatalFailure { reason })) => {
            TaskState::FatalFailure {
                reason: reason.clone(),
            }
        }
        Some(Resolution::Outcome(TransactionOutcome::TransientFailure { reason })) => {
            TaskState::RetriesExhausted {
                last_reason: reason.clone(),
            }
        }
        Some(Resolution::TimedOut(after)) => TaskState::RetriesExhausted {
            last_reason: timeout_reason(*after),
        },
        Some(Resolution::Panicked(reason)) => TaskState::FatalFailure {
            reason: reason.clone(),
        },
        Some(Resolution::Cancelled) | None => TaskState::Cancelled,
    }
}

fn attempt_record(submission: &Submission, trace: &AttemptTrace, terminal: bool) -> AttemptRecord {
    let (status, receipt, reason) = match &trace.resolution {
        Resolution::Outcome(TransactionOutcome::Committed(receipt)) => {
            (AttemptStatus::Committed, Some(receipt), None)
        }
        Resolution::Outcome(TransactionOutcome::FatalFailure { reason }) => {
            (AttemptStatus::FatalFailure, None, Some(reason.clone()))
        }
        Resolution::Outcome(TransactionOutcome::TransientFailure { reason }) => {
            let status = if terminal {
                AttemptStatus::RetriesExhausted
            } else {
                AttemptStatus::TransientFailure
            };
            (status, None, Some(reason.clone()))
        }
        Resolution::TimedOut(after) => {
            let status = if terminal {
                AttemptStatus::RetriesExhausted
            } else {
                AttemptStatus::TimedOut
            };
            (status, None, Some(timeout_reason(*after)))
        }
        Resolution::Panicked(reason) => (AttemptStatus::FatalFailure, None, Some(reason.clone())),
        Resolution::Cancelled => (
            AttemptStatus::Cancelled,
            None,
            Some("cancellation requested".to_string()),
        ),
    };

    AttemptRecord {
        round: submission.round,
        client_index: submission.client_index,
        address: submission.address.clone(),
        weight: submission.weight,
        attempt_number: trace.attempt_number,
        started_at: trace.started_at,
        latency_ms: trace.latency.as_millis() as u64,
        backoff_ms: trace.backoff.as_millis() as u64,
        status,
        gas_used: receipt.map(|r| r.gas_used),
        cost_estimate: receipt.map(|r| r.cost_estimate),
        receipt_id: receipt.map(|r| r.receipt_id.clone()),
        reason,
    }
}

fn lost_task_report(
    round: Round,
    client_index: usize,
    address: Address,
    weight: Weight,
    err: JoinError,
) -> TaskReport {
    let (state, status, reason) = if err.is_panic() {
        let reason = format!("submission task panicked: {err}");
        tracing::error!("Round {}: client {} {}", round, client_index, reason);
        (
            TaskState::FatalFailure {
                reason: reason.clone(),
            },
            AttemptStatus::FatalFailure,
            reason,
        )
    } else {
        (
            TaskState::Cancelled,
            AttemptStatus::Cancelled,
            "submission task aborted".to_string(),
        )
    };

    let record = AttemptRecord {
        round,
        client_index,
        address: address.clone(),
        weight,
        attempt_number: 1,
        started_at: Utc::now(),
        latency_ms: 0,
        backoff_ms: 0,
        status,
        gas_used: None,
        cost_estimate: None,
        receipt_id: None,
        reason: Some(reason),
    };

    TaskReport {
        round,
        client_index,
        address,
        weight,
        state,
        attempts: vec![record],
    }
}
