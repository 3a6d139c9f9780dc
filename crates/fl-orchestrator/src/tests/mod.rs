//! Shared fixtures: a scripted in-memory ledger and client helpers


use crate::error::LedgerError;
use crate::ledger::{LedgerClient, ScoreRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fl_types::{
    Address, ClientIdentity, CommitReceipt, LedgerEntry, ReputationScore, Round, Submission,
    SubmissionSigner, TransactionOutcome,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What the ledger does with one submit call
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Step {
    Commit,
    Transient,
    Fatal,
    /// Never resolves
    Hang,
    Panic,
}

#[derive(Debug, Clone)]
pub(crate) struct SubmitCall {
    pub round: Round,
    pub address: Address,
    pub at: DateTime<Utc>,
}

/// Ledger whose behaviour is scripted per address
pub(crate) struct ScriptedLedger {
    scripts: Mutex<HashMap<Address, VecDeque<Step>>>,
    default_step: Step,
    submit_delay: Duration,
    recorded: Mutex<HashMap<Round, Vec<LedgerEntry>>>,
    calls: Mutex<Vec<SubmitCall>>,
    failing_reads: Mutex<HashSet<Round>>,
    hanging_reads: Mutex<HashSet<Round>>,
    score_steps: Mutex<VecDeque<Step>>,
    scored: Mutex<Vec<(Round, Vec<LedgerEntry>)>>,
    hidden: Mutex<HashSet<Address>>,
    extra: Mutex<Vec<LedgerEntry>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    commits: AtomicUsize,
}

impl ScriptedLedger {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_step: Step::Commit,
            submit_delay: Duration::ZERO,
            recorded: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failing_reads: Mutex::new(HashSet::new()),
            hanging_reads: Mutex::new(HashSet::new()),
            score_steps: Mutex::new(VecDeque::new()),
            scored: Mutex::new(Vec::new()),
            hidden: Mutex::new(HashSet::new()),
            extra: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
        }
    }

    /// Behaviour once an address's script runs out
    pub fn with_default(mut self, step: Step) -> Self {
        self.default_step = step;
        self
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn script(self, address: &str, steps: &[Step]) -> Self {
        self.scripts
            .lock()
            .insert(Address::new(address), steps.iter().copied().collect());
        self
    }

    pub fn fail_reads(self, round: Round) -> Self {
        self.failing_reads.lock().insert(round);
        self
    }

    /// Reads of `round` never resolve
    pub fn hang_reads(self, round: Round) -> Self {
        self.hanging_reads.lock().insert(round);
        self
    }

    /// Behaviour of successive score updates; commits once the script runs out
    pub fn script_scores(self, steps: &[Step]) -> Self {
        self.score_steps.lock().extend(steps.iter().copied());
        self
    }

    /// Every committed score update, in order
    pub fn scored(&self) -> Vec<(Round, Vec<LedgerEntry>)> {
        self.scored.lock().clone()
    }

    /// Drop an address from read-backs even after it commits
    pub fn hide(self, address: &str) -> Self {
        self.hidden.lock().insert(Address::new(address));
        self
    }

    /// Add an entry to every read-back
    pub fn extra(self, address: &str, weight: f64) -> Self {
        self.extra.lock().push(LedgerEntry {
            address: Address::new(address),
            weight: fl_types::Weight::new(weight).unwrap(),
        });
        self
    }

    pub fn calls(&self) -> Vec<SubmitCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, address: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.address.as_str() == address)
            .count()
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self, address: &Address) -> Step {
        self.scripts
            .lock()
            .get_mut(address)
            .and_then(|steps| steps.pop_front())
            .unwrap_or(self.default_step)
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn submit(
        &self,
        identity: &ClientIdentity,
        submission: &Submission,
    ) -> TransactionOutcome {
        self.calls.lock().push(SubmitCall {
            round: submission.round,
            address: identity.address.clone(),
            at: Utc::now(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }

        let step = self.next_step(&identity.address);
        let outcome = match step {
            Step::Commit => {
                self.recorded
                    .lock()
                    .entry(submission.round)
                    .or_default()
                    .push(LedgerEntry {
                        address: submission.address.clone(),
                        weight: submission.weight,
                    });
                self.commits.fetch_add(1, Ordering::SeqCst);
                TransactionOutcome::Committed(CommitReceipt {
                    gas_used: 50_000,
                    cost_estimate: 50_000.0 * 25e-9,
                    latency: self.submit_delay,
                    receipt_id: format!("0x{}-{}", submission.round, submission.client_index),
                })
            }
            Step::Transient => TransactionOutcome::transient("nonce has already been used"),
            Step::Fatal => TransactionOutcome::fatal("execution reverted: client not registered"),
            Step::Hang => std::future::pending().await,
            Step::Panic => panic!("ledger adapter bug"),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn read_round_state(&self, round: Round) -> Result<Vec<LedgerEntry>, LedgerError> {
        if self.failing_reads.lock().contains(&round) {
            return Err(LedgerError::Unavailable("connection reset by peer".into()));
        }
        if self.hanging_reads.lock().contains(&round) {
            std::future::pending::<()>().await;
        }

        let hidden = self.hidden.lock().clone();
        let mut entries: Vec<LedgerEntry> = self
            .recorded
            .lock()
            .get(&round)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| !hidden.contains(&e.address))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        entries.extend(self.extra.lock().iter().cloned());
        Ok(entries)
    }
}

/// Scores are the sum of every value scored for an address
#[async_trait]
impl ScoreRegistry for ScriptedLedger {
    async fn update_scores(&self, round: Round, entries: &[LedgerEntry]) -> TransactionOutcome {
        let step = self.score_steps.lock().pop_front().unwrap_or(Step::Commit);
        match step {
            Step::Commit => {
                self.scored.lock().push((round, entries.to_vec()));
                TransactionOutcome::Committed(CommitReceipt {
                    gas_used: 80_000,
                    cost_estimate: 80_000.0 * 25e-9,
                    latency: Duration::ZERO,
                    receipt_id: format!("0xscores-{round}"),
                })
            }
            Step::Transient => TransactionOutcome::transient("replacement fee too low"),
            Step::Fatal => TransactionOutcome::fatal("execution reverted: round already scored"),
            Step::Hang => std::future::pending().await,
            Step::Panic => panic!("score registry bug"),
        }
    }

    async fn reputation_scores(
        &self,
        addresses: &[Address],
    ) -> Result<Vec<ReputationScore>, LedgerError> {
        let scored = self.scored.lock();
        Ok(addresses
            .iter()
            .map(|address| ReputationScore {
                address: address.clone(),
                score: scored
                    .iter()
                    .flat_map(|(_, entries)| entries.iter())
                    .filter(|e| &e.address == address)
                    .map(|e| e.weight.value())
                    .sum(),
            })
            .collect())
    }
}

struct TestSigner;

impl SubmissionSigner for TestSigner {
    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        payload.iter().rev().copied().collect()
    }
}

pub(crate) fn client(name: &str) -> ClientIdentity {
    ClientIdentity::new(Address::new(name), Arc::new(TestSigner))
}

/// Clients named `client-0`, `client-1`, ...
pub(crate) fn clients(n: usize) -> Vec<ClientIdentity> {
    (0..n).map(|i| client(&format!("client-{i}"))).collect()
}
