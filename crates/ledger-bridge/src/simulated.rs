//! Simulated ledger - an in-process round-weight ledger with fault injection
//!
//! Verifies client signatures, charges gas and can be told to fail writes
//! transiently, drop receipts of writes that did land, and fail reads. All
//! randomness comes from one seedable RNG so runs can be replayed.
//!
//! Also keeps per-client reputation: each scored value `v` contributes a
//! quality of `1 / (1 + v)` and a client's score is the mean over every
//! round it was scored in.

use crate::keys;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use fl_orchestrator::{ClientRegistry, LedgerClient, LedgerError, ScoreRegistry};
use fl_types::{
    Address, ClientIdentity, CommitReceipt, LedgerEntry, ReputationScore, Round, Submission,
    TransactionOutcome,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const TRANSIENT_REASONS: &[&str] = &[
    "nonce too low",
    "replacement transaction underpriced",
    "header not found",
    "connection reset by peer",
];

/// Fault and fee parameters of the simulated ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultProfile {
    /// Probability that a write fails transiently
    pub transient_failure_rate: f64,
    /// Probability that a write lands but its receipt is lost
    pub lost_receipt_rate: f64,
    /// Probability that a round read fails
    pub read_failure_rate: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub gas_per_submission: u64,
    pub gas_per_registration: u64,
    /// Base gas of a score update, plus `gas_per_scored_client` per value
    pub gas_per_score_update: u64,
    pub gas_per_scored_client: u64,
    pub gas_price_gwei: f64,
    /// Reject submissions from unregistered clients
    pub require_registration: bool,
    pub seed: Option<u64>,
}

impl Default for FaultProfile {
    fn default() -> Self {
        Self {
            transient_failure_rate: 0.0,
            lost_receipt_rate: 0.0,
            read_failure_rate: 0.0,
            min_latency_ms: 5,
            max_latency_ms: 20,
            gas_per_submission: 65_000,
            gas_per_registration: 46_000,
            gas_per_score_update: 30_000,
            gas_per_scored_client: 22_000,
            gas_price_gwei: 25.0,
            require_registration: false,
            seed: None,
        }
    }
}

/// Call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub submissions: u64,
    pub commits: u64,
    pub transient_failures: u64,
    pub fatal_failures: u64,
    pub lost_receipts: u64,
    pub registrations: u64,
    pub score_updates: u64,
    pub reads: u64,
    pub read_failures: u64,
}

#[derive(Default)]
struct Counters {
    submissions: AtomicU64,
    commits: AtomicU64,
    transient_failures: AtomicU64,
    fatal_failures: AtomicU64,
    lost_receipts: AtomicU64,
    registrations: AtomicU64,
    score_updates: AtomicU64,
    reads: AtomicU64,
    read_failures: AtomicU64,
}

/// Running sum of per-round quality
#[derive(Default, Clone, Copy)]
struct Reputation {
    total: f64,
    rounds: u32,
}

impl Reputation {
    fn score(&self) -> f64 {
        if self.rounds == 0 {
            0.0
        } else {
            self.total / self.rounds as f64
        }
    }
}

enum Fault {
    None,
    Transient(&'static str),
    LostReceipt,
}

pub struct SimulatedLedger {
    profile: FaultProfile,
    rng: Mutex<StdRng>,
    rounds: DashMap<Round, Vec<LedgerEntry>>,
    registered: DashSet<Address>,
    reputation: DashMap<Address, Reputation>,
    scored_rounds: DashSet<Round>,
    counters: Counters,
    nonce: AtomicU64,
}

impl SimulatedLedger {
    pub fn new(profile: FaultProfile) -> Self {
        let rng = match profile.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            profile,
            rng: Mutex::new(rng),
            rounds: DashMap::new(),
            registered: DashSet::new(),
            reputation: DashMap::new(),
            scored_rounds: DashSet::new(),
            counters: Counters::default(),
            nonce: AtomicU64::new(0),
        }
    }

    pub fn profile(&self) -> &FaultProfile {
        &self.profile
    }

    /// Entries recorded for a round, bypassing fault injection
    pub fn entries(&self, round: Round) -> Vec<LedgerEntry> {
        self.rounds
            .get(&round)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> LedgerStats {
        let c = &self.counters;
        LedgerStats {
            submissions: c.submissions.load(Ordering::Relaxed),
            commits: c.commits.load(Ordering::Relaxed),
            transient_failures: c.transient_failures.load(Ordering::Relaxed),
            fatal_failures: c.fatal_failures.load(Ordering::Relaxed),
            lost_receipts: c.lost_receipts.load(Ordering::Relaxed),
            registrations: c.registrations.load(Ordering::Relaxed),
            score_updates: c.score_updates.load(Ordering::Relaxed),
            reads: c.reads.load(Ordering::Relaxed),
            read_failures: c.read_failures.load(Ordering::Relaxed),
        }
    }

    fn sample_latency(&self) -> Duration {
        let (lo, hi) = (self.profile.min_latency_ms, self.profile.max_latency_ms);
        if hi <= lo {
            return Duration::from_millis(lo);
        }
        Duration::from_millis(self.rng.lock().gen_range(lo..=hi))
    }

    fn roll(&self, rate: f64) -> bool {
        rate > 0.0 && self.rng.lock().gen_bool(rate.clamp(0.0, 1.0))
    }

    fn roll_write_fault(&self) -> Fault {
        if self.roll(self.profile.transient_failure_rate) {
            let reason = {
                let mut rng = self.rng.lock();
                TRANSIENT_REASONS[rng.gen_range(0..TRANSIENT_REASONS.len())]
            };
            return Fault::Transient(reason);
        }
        if self.roll(self.profile.lost_receipt_rate) {
            return Fault::LostReceipt;
        }
        Fault::None
    }

    fn receipt(&self, gas_used: u64, latency: Duration, seed: &[u8]) -> CommitReceipt {
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
        let mut hasher = blake3::Hasher::new();
        hasher.update(seed);
        hasher.update(&nonce.to_le_bytes());
        CommitReceipt {
            gas_used,
            cost_estimate: gas_used as f64 * self.profile.gas_price_gwei * 1e-9,
            latency,
            receipt_id: bs58::encode(hasher.finalize().as_bytes()).into_string(),
        }
    }

    fn fatal(&self, reason: impl Into<String>) -> TransactionOutcome {
        self.counters.fatal_failures.fetch_add(1, Ordering::Relaxed);
        TransactionOutcome::fatal(reason)
    }

    fn transient(&self, reason: &str) -> TransactionOutcome {
        self.counters
            .transient_failures
            .fetch_add(1, Ordering::Relaxed);
        TransactionOutcome::transient(reason)
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn submit(
        &self,
        identity: &ClientIdentity,
        submission: &Submission,
    ) -> TransactionOutcome {
        self.counters.submissions.fetch_add(1, Ordering::Relaxed);
        let latency = self.sample_latency();
        tokio::time::sleep(latency).await;

        if submission.address != identity.address {
            return self.fatal("sender does not match submission address");
        }

        let payload = submission.signing_payload();
        let signature = identity.signer.sign(&payload);
        if !keys::verify(&identity.address, &payload, &signature) {
            return self.fatal("invalid signature");
        }

        if self.profile.require_registration && !self.registered.contains(&identity.address) {
            return self.fatal("execution reverted: client not registered");
        }

        let fault = self.roll_write_fault();
        if let Fault::Transient(reason) = fault {
            tracing::debug!(
                "Simulated transient failure for {} in round {}: {}",
                identity.address.short(),
                submission.round,
                reason
            );
            return self.transient(reason);
        }

        self.rounds
            .entry(submission.round)
            .or_default()
            .push(LedgerEntry {
                address: submission.address.clone(),
                weight: submission.weight,
            });

        if let Fault::LostReceipt = fault {
            self.counters.lost_receipts.fetch_add(1, Ordering::Relaxed);
            return self.transient("timeout waiting for transaction receipt");
        }

        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        TransactionOutcome::Committed(self.receipt(
            self.profile.gas_per_submission,
            latency,
            &payload,
        ))
    }

    async fn read_round_state(&self, round: Round) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.sample_latency()).await;

        if self.roll(self.profile.read_failure_rate) {
            self.counters.read_failures.fetch_add(1, Ordering::Relaxed);
            return Err(LedgerError::Unavailable(
                "simulated read failure".to_string(),
            ));
        }
        Ok(self.entries(round))
    }
}

#[async_trait]
impl ClientRegistry for SimulatedLedger {
    async fn is_registered(&self, address: &Address) -> Result<bool, LedgerError> {
        Ok(self.registered.contains(address))
    }

    async fn register(&self, identity: &ClientIdentity) -> TransactionOutcome {
        let latency = self.sample_latency();
        tokio::time::sleep(latency).await;

        let payload = identity.address.as_str().as_bytes();
        let signature = identity.signer.sign(payload);
        if !keys::verify(&identity.address, payload, &signature) {
            return self.fatal("invalid signature");
        }
        if self.registered.contains(&identity.address) {
            return self.fatal("execution reverted: client already registered");
        }
        if let Fault::Transient(reason) = self.roll_write_fault() {
            return self.transient(reason);
        }

        self.registered.insert(identity.address.clone());
        self.counters.registrations.fetch_add(1, Ordering::Relaxed);
        TransactionOutcome::Committed(self.receipt(
            self.profile.gas_per_registration,
            latency,
            payload,
        ))
    }
}

#[async_trait]
impl ScoreRegistry for SimulatedLedger {
    async fn update_scores(&self, round: Round, entries: &[LedgerEntry]) -> TransactionOutcome {
        let latency = self.sample_latency();
        tokio::time::sleep(latency).await;

        if entries.is_empty() {
            return self.fatal("execution reverted: empty score update");
        }
        if self.scored_rounds.contains(&round) {
            return self.fatal("execution reverted: round already scored");
        }
        if let Fault::Transient(reason) = self.roll_write_fault() {
            return self.transient(reason);
        }

        for entry in entries {
            let mut reputation = self.reputation.entry(entry.address.clone()).or_default();
            reputation.total += 1.0 / (1.0 + entry.weight.value().abs());
            reputation.rounds += 1;
        }
        self.scored_rounds.insert(round);
        self.counters.score_updates.fetch_add(1, Ordering::Relaxed);

        let gas_used = self.profile.gas_per_score_update
            + self.profile.gas_per_scored_client * entries.len() as u64;
        TransactionOutcome::Committed(self.receipt(gas_used, latency, &round.to_le_bytes()))
    }

    async fn reputation_scores(
        &self,
        addresses: &[Address],
    ) -> Result<Vec<ReputationScore>, LedgerError> {
        tokio::time::sleep(self.sample_latency()).await;

        if self.roll(self.profile.read_failure_rate) {
            self.counters.read_failures.fetch_add(1, Ordering::Relaxed);
            return Err(LedgerError::Unavailable(
                "simulated read failure".to_string(),
            ));
        }
        Ok(addresses
            .iter()
            .filter_map(|address| {
                self.reputation.get(address).map(|r| ReputationScore {
                    address: address.clone(),
                    score: r.score(),
                })
            })
            .collect())
    }
}
