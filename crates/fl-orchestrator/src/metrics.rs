//! Metrics records and sinks
//!
//! The orchestrator emits one `AttemptRecord` per ledger attempt, one
//! `RoundResult` per round and, with a score registry attached, one
//! `ScoreUpdateRecord` per round. Records are handed to the sink from the
//! orchestrator's own flow after each round's barrier, so a sink observes a
//! serialized stream in round order.

use crate::registrar::RegistrationRecord;
use crate::reputation::{ScoreUpdateRecord, ScoreUpdateStatus};
use crate::round::RoundResult;
use chrono::{DateTime, Utc};
use fl_types::{Address, Round, Weight};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

/// Status of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Committed,
    /// Transient failure that was retried
    TransientFailure,
    /// Attempt exceeded the per-attempt timeout and was retried
    TimedOut,
    FatalFailure,
    /// Last transient failure once the retry budget ran out
    RetriesExhausted,
    Cancelled,
}

impl AttemptStatus {
    /// Terminal statuses end a task; exactly one per task
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::TransientFailure | Self::TimedOut)
    }
}

/// One ledger attempt for one client in one round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub round: Round,
    pub client_index: usize,
    pub address: Address,
    pub weight: Weight,
    /// 1-indexed
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub latency_ms: u64,
    /// Delay waited before this attempt (0 for the first)
    pub backoff_ms: u64,
    pub status: AttemptStatus,
    pub gas_used: Option<u64>,
    pub cost_estimate: Option<f64>,
    pub receipt_id: Option<String>,
    pub reason: Option<String>,
}

impl AttemptRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Everything a sink can receive
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricsRecord {
    Attempt(AttemptRecord),
    Round(RoundResult),
    ScoreUpdate(ScoreUpdateRecord),
    Registration(RegistrationRecord),
}

/// Append-only destination for metrics records
///
/// `record` must not block indefinitely and must not silently drop records;
/// sinks that can fail report the failure through logging.
pub trait MetricsSink: Send + Sync {
    fn record(&self, record: MetricsRecord);
}

impl<S: MetricsSink + ?Sized> MetricsSink for Arc<S> {
    fn record(&self, record: MetricsRecord) {
        (**self).record(record)
    }
}

/// Keeps every record in memory
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<MetricsRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records in emission order
    pub fn records(&self) -> Vec<MetricsRecord> {
        self.records.lock().clone()
    }

    pub fn attempts(&self) -> Vec<AttemptRecord> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                MetricsRecord::Attempt(a) => Some(a.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn rounds(&self) -> Vec<RoundResult> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                MetricsRecord::Round(round) => Some(round.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn score_updates(&self) -> Vec<ScoreUpdateRecord> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                MetricsRecord::ScoreUpdate(update) => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn registrations(&self) -> Vec<RegistrationRecord> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                MetricsRecord::Registration(reg) => Some(reg.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl MetricsSink for MemorySink {
    fn record(&self, record: MetricsRecord) {
        self.records.lock().push(record);
    }
}

/// Renders records as log events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&self, record: MetricsRecord) {
        match record {
            MetricsRecord::Attempt(a) => match a.status {
                AttemptStatus::Committed => tracing::info!(
                    round = a.round,
                    client = a.client_index,
                    attempt = a.attempt_number,
                    gas_used = a.gas_used.unwrap_or_default(),
                    latency_ms = a.latency_ms,
                    "Weight committed for {} (tx {})",
                    a.address.short(),
                    a.receipt_id.as_deref().unwrap_or("-")
                ),
                AttemptStatus::TransientFailure | AttemptStatus::TimedOut => tracing::debug!(
                    round = a.round,
                    client = a.client_index,
                    attempt = a.attempt_number,
                    "Attempt failed for {}: {}",
                    a.address.short(),
                    a.reason.as_deref().unwrap_or("unknown")
                ),
                _ => tracing::warn!(
                    round = a.round,
                    client = a.client_index,
                    attempt = a.attempt_number,
                    status = ?a.status,
                    "Submission for {} ended without commit: {}",
                    a.address.short(),
                    a.reason.as_deref().unwrap_or("unknown")
                ),
            },
            MetricsRecord::Round(r) => tracing::info!(
                round = r.round,
                committed = r.counts.committed,
                failed = r.counts.failed,
                skipped = r.counts.skipped,
                cancelled = r.counts.cancelled,
                inconsistencies = r.inconsistency_count(),
                gas_used = r.total_gas_used,
                elapsed_ms = r.elapsed_ms,
                "Round {} closed{}",
                r.round,
                if r.is_degraded() { " (degraded)" } else { "" }
            ),
            MetricsRecord::ScoreUpdate(u) => match u.status {
                ScoreUpdateStatus::Committed => tracing::info!(
                    round = u.round,
                    clients = u.clients,
                    attempts = u.attempts,
                    gas_used = u.gas_used.unwrap_or_default(),
                    latency_ms = u.latency_ms,
                    "Scores updated (tx {})",
                    u.receipt_id.as_deref().unwrap_or("-")
                ),
                _ => tracing::warn!(
                    round = u.round,
                    status = ?u.status,
                    attempts = u.attempts,
                    "Score update not committed: {}",
                    u.reason.as_deref().unwrap_or("unknown")
                ),
            },
            MetricsRecord::Registration(reg) => tracing::info!(
                client = reg.client_index,
                status = ?reg.status,
                attempts = reg.attempts,
                "Registration for {}",
                reg.address.short()
            ),
        }
    }
}

/// Forwards every record to each inner sink in order
#[derive(Default, Clone)]
pub struct TeeSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl TeeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl MetricsSink for TeeSink {
    fn record(&self, record: MetricsRecord) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(record.clone());
            }
            last.record(record);
        }
    }
}
