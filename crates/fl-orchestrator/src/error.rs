//! Orchestrator errors
//!
//! Only configuration problems abort a run. Everything that goes wrong inside
//! a round is recorded in its `RoundResult` and attempt records instead.

use fl_types::{Address, Round};
use thiserror::Error;

/// Run-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error("Client list is empty")]
    EmptyClientList,

    #[error("Invalid round range {start}..={end} (rounds start at 1 and must not decrease)")]
    InvalidRoundRange { start: Round, end: Round },

    #[error("Client {0} appears more than once in the client list")]
    DuplicateClient(Address),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors from the ledger's read paths
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Ledger rejected request: {0}")]
    Rejected(String),
}
