//! Ledger capabilities consumed by the orchestrator
//!
//! Fee parameters, signature schemes and wire encoding live in the adapter
//! implementing these traits. Implementations are shared across every
//! submission task of a round and must tolerate concurrent calls.

use crate::error::LedgerError;
use async_trait::async_trait;
use fl_types::{
    Address, ClientIdentity, LedgerEntry, ReputationScore, Round, Submission, TransactionOutcome,
};

/// Write and read paths of the round-weight ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit one client's weight for a round
    ///
    /// Adapters must classify every failure as transient or fatal.
    async fn submit(&self, identity: &ClientIdentity, submission: &Submission)
        -> TransactionOutcome;

    /// Read every (address, weight) recorded for a round
    async fn read_round_state(&self, round: Round) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Whether `address` already has a weight recorded for `round`
    async fn has_submitted(&self, round: Round, address: &Address) -> Result<bool, LedgerError> {
        Ok(self
            .read_round_state(round)
            .await?
            .iter()
            .any(|entry| &entry.address == address))
    }
}

/// Client registration on the ledger
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    async fn is_registered(&self, address: &Address) -> Result<bool, LedgerError>;

    async fn register(&self, identity: &ClientIdentity) -> TransactionOutcome;
}

/// Per-client reputation kept on the ledger
///
/// Scores are updated by the coordinator, not by clients: one transaction
/// per round carries every value confirmed in that round.
#[async_trait]
pub trait ScoreRegistry: Send + Sync {
    async fn update_scores(&self, round: Round, entries: &[LedgerEntry]) -> TransactionOutcome;

    /// Current score of each address the registry knows, in input order
    async fn reputation_scores(
        &self,
        addresses: &[Address],
    ) -> Result<Vec<ReputationScore>, LedgerError>;
}
