//! Client registration - registers each client on the ledger before the
//! first round, one client at a time

use crate::attempt::{AttemptDriver, Resolution};
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::ledger::ClientRegistry;
use crate::metrics::{MetricsRecord, MetricsSink};
use crate::orchestrator::check_clients;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use fl_types::{Address, ClientIdentity, TransactionOutcome};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Registered,
    AlreadyRegistered,
    Failed,
    Cancelled,
}

/// Outcome of registering one client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationRecord {
    pub client_index: usize,
    pub address: Address,
    pub status: RegistrationStatus,
    /// Ledger attempts made (0 when already registered)
    pub attempts: u32,
    pub gas_used: Option<u64>,
    pub cost_estimate: Option<f64>,
    pub receipt_id: Option<String>,
    /// Wall time for this client, pre-check and retries included
    pub latency_ms: u64,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistrationSummary {
    pub registered: usize,
    pub already_registered: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_gas_used: u64,
    pub total_cost: f64,
}

impl RegistrationSummary {
    fn add(&mut self, record: &RegistrationRecord) {
        match record.status {
            RegistrationStatus::Registered => self.registered += 1,
            RegistrationStatus::AlreadyRegistered => self.already_registered += 1,
            RegistrationStatus::Failed => self.failed += 1,
            RegistrationStatus::Cancelled => self.cancelled += 1,
        }
        self.total_gas_used += record.gas_used.unwrap_or(0);
        self.total_cost += record.cost_estimate.unwrap_or(0.0);
    }
}

/// Registers clients sequentially with the same retry rules as submissions
pub struct ClientRegistrar {
    registry: Arc<dyn ClientRegistry>,
    sink: Arc<dyn MetricsSink>,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl ClientRegistrar {
    pub fn new(
        registry: Arc<dyn ClientRegistry>,
        sink: Arc<dyn MetricsSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            sink,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Register every client not yet registered
    ///
    /// Clients after a cancellation are not visited at all.
    pub async fn register_all(
        &self,
        clients: &[ClientIdentity],
    ) -> Result<RegistrationSummary, OrchestratorError> {
        check_clients(clients)?;
        self.config.validate()?;

        let policy = RetryPolicy::from_config(&self.config);
        let mut summary = RegistrationSummary::default();

        for (client_index, identity) in clients.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!(
                    "Cancellation requested, stopping registration at client {}",
                    client_index
                );
                break;
            }

            tracing::info!(
                "Incoming client: registration for client {} ({})",
                client_index + 1,
                identity.address.short()
            );

            let record = self.register_one(&policy, client_index, identity).await;
            summary.add(&record);
            self.sink.record(MetricsRecord::Registration(record));

            if client_index + 1 < clients.len() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.registration_delay) => {}
                }
            }
        }

        tracing::info!(
            "Registration finished: {} registered, {} already registered, {} failed",
            summary.registered,
            summary.already_registered,
            summary.failed
        );
        Ok(summary)
    }

    async fn register_one(
        &self,
        policy: &RetryPolicy,
        client_index: usize,
        identity: &ClientIdentity,
    ) -> RegistrationRecord {
        let started = Instant::now();
        let timeout = self.config.per_attempt_timeout;

        let mut record = RegistrationRecord {
            client_index,
            address: identity.address.clone(),
            status: RegistrationStatus::Failed,
            attempts: 0,
            gas_used: None,
            cost_estimate: None,
            receipt_id: None,
            latency_ms: 0,
            reason: None,
            recorded_at: Utc::now(),
        };

        match tokio::time::timeout(timeout, self.registry.is_registered(&identity.address)).await {
            Ok(Ok(true)) => {
                tracing::info!("Account {} is already registered", identity.address);
                record.status = RegistrationStatus::AlreadyRegistered;
                record.latency_ms = started.elapsed().as_millis() as u64;
                return record;
            }
            Ok(Ok(false)) => {}
            Ok(Err(e)) => tracing::warn!(
                "Registration check for {} failed, registering anyway: {}",
                identity.address.short(),
                e
            ),
            Err(_) => tracing::warn!(
                "Registration check for {} timed out, registering anyway",
                identity.address.short()
            ),
        }

        let driver = AttemptDriver {
            policy,
            max_retries: self.config.max_retries,
            timeout,
            cancel: &self.cancel,
            limiter: None,
        };
        let traces = driver.drive(|| self.registry.register(identity)).await;

        record.attempts = traces.last().map(|t| t.attempt_number).unwrap_or(0);
        record.latency_ms = started.elapsed().as_millis() as u64;
        record.recorded_at = Utc::now();

        match traces.last().map(|t| &t.resolution) {
            Some(Resolution::Outcome(TransactionOutcome::Committed(receipt))) => {
                record.status = RegistrationStatus::Registered;
                record.gas_used = Some(receipt.gas_used);
                record.cost_estimate = Some(receipt.cost_estimate);
                record.receipt_id = Some(receipt.receipt_id.clone());
            }
            Some(Resolution::Outcome(outcome)) => {
                record.reason = outcome.reason().map(str::to_string);
            }
            Some(Resolution::TimedOut(after)) => {
                record.reason = Some(format!(
                    "registration timed out after {}ms",
                    after.as_millis()
                ));
            }
            Some(Resolution::Panicked(reason)) => {
                record.reason = Some(reason.clone());
            }
            Some(Resolution::Cancelled) | None => {
                record.status = RegistrationStatus::Cancelled;
            }
        }

        if record.status == RegistrationStatus::Failed {
            tracing::error!(
                "Error registering client {}: {}",
                identity.address,
                record.reason.as_deref().unwrap_or("unknown")
            );
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::metrics::MemorySink;
    use async_trait::async_trait;
    use fl_types::{CommitReceipt, SubmissionSigner};
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    struct NoopSigner;

    impl SubmissionSigner for NoopSigner {
        fn sign(&self, payload: &[u8]) -> Vec<u8> {
            payload.to_vec()
        }
    }

    fn identity(name: &str) -> ClientIdentity {
        ClientIdentity::new(Address::new(name), Arc::new(NoopSigner))
    }

    /// Registry that fails a configurable number of times per address
    #[derive(Default)]
    struct FlakyRegistry {
        registered: Mutex<HashSet<Address>>,
        failures_left: Mutex<HashMap<Address, u32>>,
        fatal: HashSet<Address>,
        panics: HashSet<Address>,
        calls: Mutex<HashMap<Address, u32>>,
    }

    #[async_trait]
    impl ClientRegistry for FlakyRegistry {
        async fn is_registered(&self, address: &Address) -> Result<bool, LedgerError> {
            Ok(self.registered.lock().contains(address))
        }

        async fn register(&self, identity: &ClientIdentity) -> TransactionOutcome {
            let address = &identity.address;
            *self.calls.lock().entry(address.clone()).or_default() += 1;

            if self.fatal.contains(address) {
                return TransactionOutcome::fatal("insufficient funds");
            }
            if self.panics.contains(address) {
                panic!("registry connection poisoned");
            }
            if let Some(left) = self.failures_left.lock().get_mut(address) {
                if *left > 0 {
                    *left -= 1;
                    return TransactionOutcome::transient("replacement fee too low");
                }
            }
            self.registered.lock().insert(address.clone());
            TransactionOutcome::Committed(CommitReceipt {
                gas_used: 46_000,
                cost_estimate: 46_000.0 * 30e-9,
                latency: Duration::from_millis(10),
                receipt_id: format!("reg-{address}"),
            })
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_max_retries(3)
            .with_backoff(Duration::from_millis(10), 2.0)
            .with_registration_delay(Duration::from_millis(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_registers_skips_and_fails() {
        let registry = Arc::new(FlakyRegistry {
            fatal: [Address::new("broke")].into_iter().collect(),
            ..Default::default()
        });
        registry.registered.lock().insert(Address::new("old"));
        registry
            .failures_left
            .lock()
            .insert(Address::new("flaky"), 2);

        let sink = Arc::new(MemorySink::new());
        let registrar = ClientRegistrar::new(registry.clone(), sink.clone(), config());

        let clients = vec![
            identity("fresh"),
            identity("old"),
            identity("flaky"),
            identity("broke"),
        ];
        let summary = registrar.register_all(&clients).await.unwrap();

        assert_eq!(summary.registered, 2);
        assert_eq!(summary.already_registered, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_gas_used, 92_000);

        let records = sink.registrations();
        assert_eq!(records.len(), 4);
        assert_eq!(records[1].status, RegistrationStatus::AlreadyRegistered);
        assert_eq!(records[1].attempts, 0);
        assert_eq!(records[2].attempts, 3);
        assert_eq!(records[3].attempts, 1);
        assert_eq!(records[3].reason.as_deref(), Some("insufficient funds"));

        // the already-registered client never reached register()
        assert!(!registry.calls.lock().contains_key(&Address::new("old")));
    }

    #[tokio::test]
    async fn test_empty_client_list_is_rejected() {
        let registrar = ClientRegistrar::new(
            Arc::new(FlakyRegistry::default()),
            Arc::new(MemorySink::new()),
            config(),
        );
        assert_eq!(
            registrar.register_all(&[]).await,
            Err(OrchestratorError::EmptyClientList)
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_visits_nobody() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sink = Arc::new(MemorySink::new());
        let registry = Arc::new(FlakyRegistry::default());
        let registrar =
            ClientRegistrar::new(registry, sink.clone(), config()).with_cancellation(cancel);

        let summary = registrar.register_all(&[identity("a")]).await.unwrap();
        assert_eq!(summary, RegistrationSummary::default());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_address_is_rejected() {
        let registry = Arc::new(FlakyRegistry::default());
        let sink = Arc::new(MemorySink::new());
        let registrar = ClientRegistrar::new(registry.clone(), sink, config());

        let clients = vec![identity("a"), identity("b"), identity("a")];
        assert_eq!(
            registrar.register_all(&clients).await,
            Err(OrchestratorError::DuplicateClient(Address::new("a")))
        );
        assert!(registry.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_registry_fails_one_client() {
        let registry = Arc::new(FlakyRegistry {
            panics: [Address::new("cursed")].into_iter().collect(),
            ..Default::default()
        });
        let sink = Arc::new(MemorySink::new());
        let registrar = ClientRegistrar::new(registry.clone(), sink.clone(), config());

        let clients = vec![identity("cursed"), identity("fine")];
        let summary = registrar.register_all(&clients).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.registered, 1);
        let records = sink.registrations();
        assert_eq!(records[0].status, RegistrationStatus::Failed);
        assert_eq!(records[0].attempts, 1);
        assert_eq!(
            records[0].reason.as_deref(),
            Some("ledger call panicked: registry connection poisoned")
        );
    }
}
