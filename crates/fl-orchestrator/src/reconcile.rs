//! Reconciliation - pairs a round's read-back against what was submitted

use fl_types::{Address, LedgerEntry, Weight};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// How one address compares between the submission side and the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    /// Committed (or already recorded) and present with the same weight
    Confirmed,
    /// Present, but with a different weight than submitted
    ValueMismatch,
    /// Reported committed but absent on read
    MissingOnLedger,
    /// Skipped, failed or cancelled, and absent as expected
    ExpectedAbsent,
    /// Skipped, failed or cancelled, yet present on read (e.g. a timed-out
    /// write that landed later)
    PresentWithoutCommit,
    /// A second entry for an address already paired this round
    Duplicate,
    /// Present on read for an address outside the round's client set
    Unexpected,
}

impl ReconciliationStatus {
    /// Statuses worth flagging to an operator
    pub fn is_inconsistent(&self) -> bool {
        !matches!(self, Self::Confirmed | Self::ExpectedAbsent)
    }
}

/// A client's expected position after the barrier
#[derive(Debug, Clone)]
pub struct ExpectedClient {
    pub client_index: usize,
    pub address: Address,
    /// Weight that was (or would have been) submitted
    pub weight: Option<Weight>,
    /// Whether the weight should now be on the ledger
    pub expects_recorded: bool,
}

/// One pairing line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledEntry {
    pub address: Address,
    pub client_index: Option<usize>,
    pub submitted: Option<Weight>,
    pub recorded: Option<Weight>,
    pub status: ReconciliationStatus,
}

/// Pairing of a round's read-back against its clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    pub entries: Vec<ReconciledEntry>,
    /// Number of entries the ledger returned
    pub recorded_count: usize,
    pub read_latency_ms: u64,
}

impl Reconciliation {
    pub fn count(&self, status: ReconciliationStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn inconsistencies(&self) -> impl Iterator<Item = &ReconciledEntry> {
        self.entries.iter().filter(|e| e.status.is_inconsistent())
    }

    pub fn entry_for(&self, address: &Address) -> Option<&ReconciledEntry> {
        self.entries.iter().find(|e| &e.address == address)
    }
}

/// Pair `recorded` against `expected`
///
/// Every client in `expected` yields exactly one entry, and every ledger
/// entry is accounted for: the first per known address pairs with its
/// client, later ones are `Duplicate`, unknown addresses are `Unexpected`.
pub fn reconcile(
    expected: &[ExpectedClient],
    recorded: &[LedgerEntry],
    read_latency: Duration,
) -> Reconciliation {
    let mut by_address: HashMap<&Address, Vec<Weight>> = HashMap::new();
    for entry in recorded {
        by_address
            .entry(&entry.address)
            .or_default()
            .push(entry.weight);
    }

    let known: HashSet<&Address> = expected.iter().map(|c| &c.address).collect();
    let mut entries = Vec::with_capacity(expected.len() + recorded.len());

    for client in expected {
        let hits = by_address.get(&client.address).map(Vec::as_slice).unwrap_or(&[]);
        let first = hits.first().copied();

        let status = match (client.expects_recorded, first) {
            (true, Some(recorded)) => match client.weight {
                Some(submitted) if !submitted.matches(&recorded) => {
                    ReconciliationStatus::ValueMismatch
                }
                _ => ReconciliationStatus::Confirmed,
            },
            (true, None) => ReconciliationStatus::MissingOnLedger,
            (false, Some(_)) => ReconciliationStatus::PresentWithoutCommit,
            (false, None) => ReconciliationStatus::ExpectedAbsent,
        };

        entries.push(ReconciledEntry {
            address: client.address.clone(),
            client_index: Some(client.client_index),
            submitted: client.weight,
            recorded: first,
            status,
        });

        for extra in hits.iter().skip(1) {
            entries.push(ReconciledEntry {
                address: client.address.clone(),
                client_index: Some(client.client_index),
                submitted: client.weight,
                recorded: Some(*extra),
                status: ReconciliationStatus::Duplicate,
            });
        }
    }

    for entry in recorded.iter().filter(|e| !known.contains(&e.address)) {
        entries.push(ReconciledEntry {
            address: entry.address.clone(),
            client_index: None,
            submitted: None,
            recorded: Some(entry.weight),
            status: ReconciliationStatus::Unexpected,
        });
    }

    Reconciliation {
        entries,
        recorded_count: recorded.len(),
        read_latency_ms: read_latency.as_millis() as u64,
    }
}
