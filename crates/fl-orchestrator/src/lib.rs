//! FL Orchestrator - round-based submission of client weights to a ledger
//!
//! Architecture:
//! - Rounds run strictly in sequence
//! - Each round fans out one task per client with a value
//! - Each task retries transient failures with exponential backoff
//! - A barrier waits for every task, then the round is read back and reconciled
//! - Confirmed values optionally update on-ledger reputation scores
//! - Attempt records and the round result go to an injected metrics sink

mod attempt;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod reconcile;
pub mod registrar;
pub mod reputation;
pub mod retry;
pub mod round;
pub mod source;
pub mod submission;

#[cfg(test)]
mod tests;

pub use config::{OrchestratorConfig, ResubmitPolicy};
pub use error::{LedgerError, OrchestratorError};
pub use ledger::{ClientRegistry, LedgerClient, ScoreRegistry};
pub use metrics::{
    AttemptRecord, AttemptStatus, MemorySink, MetricsRecord, MetricsSink, TeeSink, TracingSink,
};
pub use orchestrator::{run_rounds, RunSummary, SubmissionOrchestrator};
pub use reconcile::{ReconciledEntry, Reconciliation, ReconciliationStatus};
pub use registrar::{ClientRegistrar, RegistrationRecord, RegistrationStatus, RegistrationSummary};
pub use reputation::{ScoreUpdateRecord, ScoreUpdateStatus};
pub use retry::RetryPolicy;
pub use round::{ClientOutcome, RoundCounts, RoundResult, SkipReason, SkippedClient};
pub use source::{IdentityProvider, ValueSource};
pub use submission::{SubmissionTask, TaskReport, TaskState};
pub use tokio_util::sync::CancellationToken;
