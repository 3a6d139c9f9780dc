//! Shared types for federated-learning round submissions
//!
//! Types here are consumed by the orchestrator core and by every ledger
//! adapter, so they carry no runtime or I/O dependencies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Round number (1-based, strictly increasing within a run)
pub type Round = u64;

/// Opaque ledger address of a client
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Model-quality weight submitted by a client for a round (e.g. its NMSE)
///
/// Always finite; NaN and infinities are rejected at construction.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Weight(f64);

/// Tolerance used when comparing a submitted weight with a recorded one
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

impl Weight {
    pub fn new(value: f64) -> Option<Self> {
        value.is_finite().then_some(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Equal within [`WEIGHT_TOLERANCE`]
    pub fn matches(&self, other: &Weight) -> bool {
        (self.0 - other.0).abs() <= WEIGHT_TOLERANCE
    }
}

impl TryFrom<f64> for Weight {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Weight::new(value).ok_or_else(|| format!("weight must be finite, got {value}"))
    }
}

impl From<Weight> for f64 {
    fn from(w: Weight) -> Self {
        w.0
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability to authorize a submission on behalf of a client
///
/// The signature scheme belongs to the ledger adapter; the core only passes
/// the capability through.
pub trait SubmissionSigner: Send + Sync {
    /// Sign a canonical payload
    fn sign(&self, payload: &[u8]) -> Vec<u8>;
}

/// A client identity: address plus signing capability
#[derive(Clone)]
pub struct ClientIdentity {
    pub address: Address,
    pub signer: Arc<dyn SubmissionSigner>,
}

impl ClientIdentity {
    pub fn new(address: Address, signer: Arc<dyn SubmissionSigner>) -> Self {
        Self { address, signer }
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// One client's write for one round, as handed to the ledger
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub round: Round,
    pub client_index: usize,
    pub address: Address,
    pub weight: Weight,
}

impl Submission {
    /// Canonical bytes a signer commits to
    ///
    /// Layout: round[8 LE] + weight bits[8 LE] + address bytes
    pub fn signing_payload(&self) -> Vec<u8> {
        let address = self.address.as_str().as_bytes();
        let mut payload = Vec::with_capacity(16 + address.len());
        payload.extend_from_slice(&self.round.to_le_bytes());
        payload.extend_from_slice(&self.weight.value().to_bits().to_le_bytes());
        payload.extend_from_slice(address);
        payload
    }
}

/// Receipt details for a committed write
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommitReceipt {
    /// Gas consumed by the transaction
    pub gas_used: u64,
    /// Cost in native units (gas * effective price)
    pub cost_estimate: f64,
    /// Ledger-side latency from send to confirmation
    pub latency: Duration,
    /// External receipt identifier (transaction hash)
    pub receipt_id: String,
}

/// Classified result of one ledger write
///
/// Every adapter must decide between transient and fatal; the orchestrator
/// retries only the former.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TransactionOutcome {
    Committed(CommitReceipt),
    TransientFailure { reason: String },
    FatalFailure { reason: String },
}

impl TransactionOutcome {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::TransientFailure {
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::FatalFailure {
            reason: reason.into(),
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFailure { .. })
    }

    /// Failure reason, if any
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Committed(_) => None,
            Self::TransientFailure { reason } | Self::FatalFailure { reason } => Some(reason),
        }
    }
}

/// One (address, weight) pair as recorded on the ledger for a round
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub address: Address,
    pub weight: Weight,
}

/// A client's reputation as the ledger currently reports it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReputationScore {
    pub address: Address,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_rejects_non_finite() {
        assert!(Weight::new(f64::NAN).is_none());
        assert!(Weight::new(f64::INFINITY).is_none());
        assert_eq!(Weight::new(0.25).unwrap().value(), 0.25);
    }

    #[test]
    fn test_weight_deserialize_validates() {
        let w: Weight = serde_json::from_str("0.5").unwrap();
        assert_eq!(w.value(), 0.5);
    }

    #[test]
    fn test_signing_payload_layout() {
        let submission = Submission {
            round: 7,
            client_index: 0,
            address: Address::new("abc"),
            weight: Weight::new(1.5).unwrap(),
        };
        let payload = submission.signing_payload();
        assert_eq!(payload.len(), 19);
        assert_eq!(&payload[..8], &7u64.to_le_bytes());
        assert_eq!(&payload[8..16], &1.5f64.to_bits().to_le_bytes());
        assert_eq!(&payload[16..], b"abc");
    }

    #[test]
    fn test_address_short() {
        assert_eq!(Address::new("0123456789abcdef").short(), "01234567");
        assert_eq!(Address::new("abc").short(), "abc");
    }
}
