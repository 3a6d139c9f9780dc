//! FL Rounds
//!
//! Runs rounds of federated-learning weight submissions against the
//! simulated ledger. Clients come from a key file or are generated, values
//! from a weight table or a seeded synthetic one. With `--scores` each round's
//! confirmed values also update on-ledger reputation scores. Ctrl+C stops the
//! run after the round in progress.

use anyhow::Result;
use clap::Parser;
use fl_orchestrator::{
    ClientRegistrar, IdentityProvider, MetricsSink, SubmissionOrchestrator, TeeSink, TracingSink,
};
use fl_types::ClientIdentity;
use ledger_bridge::{generate_identities, KeyFile, SimulatedLedger, WeightTable};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod sink;

use config::RunConfig;
use sink::JsonLinesSink;

/// Federated-learning round submission runner
#[derive(Parser, Debug)]
#[command(name = "fl-rounds")]
#[command(
    about = "Submit per-round client weights to a ledger with retries and reconciliation",
    long_about = None
)]
struct Args {
    /// JSON run configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// First round (overrides config)
    #[arg(long)]
    start_round: Option<u64>,

    /// Last round, inclusive (overrides config)
    #[arg(long)]
    end_round: Option<u64>,

    /// Number of generated clients when no keys file is given
    #[arg(long)]
    clients: Option<usize>,

    /// Attempts per submission (overrides config)
    #[arg(long)]
    max_retries: Option<u32>,

    /// JSON file of client accounts
    #[arg(long)]
    keys_file: Option<PathBuf>,

    /// JSON weight table; synthetic weights are used when absent
    #[arg(long)]
    weights_file: Option<PathBuf>,

    /// Write metrics records as JSON lines to this file
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    /// Register clients on the ledger before the first round
    #[arg(long)]
    register: bool,

    /// Update reputation scores after every round
    #[arg(long)]
    scores: bool,

    /// Seed for generated keys, synthetic weights and ledger faults
    #[arg(long)]
    seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut RunConfig) {
        if let Some(round) = self.start_round {
            config.start_round = round;
        }
        if let Some(round) = self.end_round {
            config.end_round = round;
        }
        if let Some(clients) = self.clients {
            config.clients = clients;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if self.register {
            config.register_clients = true;
        }
        if self.scores {
            config.update_scores = true;
        }
        if let Some(seed) = self.seed {
            config.ledger.seed = Some(seed);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    args.apply(&mut config);

    let orchestrator_config = config.orchestrator_config();
    orchestrator_config.validate()?;

    tracing::info!("Starting FL round submission");
    tracing::info!("  Rounds: {}..={}", config.start_round, config.end_round);
    tracing::info!(
        "  Retries: {} (backoff {}ms x{})",
        config.max_retries,
        config.initial_backoff_ms,
        config.backoff_multiplier
    );
    tracing::info!("  Per-attempt timeout: {}ms", config.per_attempt_timeout_ms);
    tracing::info!("  Resubmit policy: {:?}", config.resubmit_policy);

    let clients = load_clients(&args, &config)?;
    tracing::info!("Loaded {} client accounts", clients.len());

    let values = match &args.weights_file {
        Some(path) => WeightTable::load(path)?,
        None => {
            tracing::info!("No weights file given, using synthetic weights");
            WeightTable::synthetic(
                config.start_round..=config.end_round,
                clients.len(),
                args.seed.unwrap_or_default(),
            )
        }
    };

    let ledger = Arc::new(SimulatedLedger::new(config.ledger.clone()));

    let json_sink = match &args.metrics_out {
        Some(path) => Some(Arc::new(JsonLinesSink::create(path)?)),
        None => None,
    };
    let mut tee = TeeSink::new().with(Arc::new(TracingSink));
    if let Some(json) = &json_sink {
        tee = tee.with(json.clone());
    }
    let sink: Arc<dyn MetricsSink> = Arc::new(tee);

    // Ctrl+C stops the run after the current round
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down after the current round...");
            shutdown.cancel();
        }
    });

    let started = chrono::Utc::now();

    if config.register_clients {
        let registrar =
            ClientRegistrar::new(ledger.clone(), sink.clone(), orchestrator_config.clone())
                .with_cancellation(cancel.clone());
        let summary = registrar.register_all(&clients).await?;
        tracing::info!(
            "Registration: {} registered, {} already registered, {} failed (gas {})",
            summary.registered,
            summary.already_registered,
            summary.failed,
            summary.total_gas_used
        );
    }

    let mut orchestrator = SubmissionOrchestrator::new(ledger.clone(), sink, orchestrator_config)
        .with_cancellation(cancel);
    if config.update_scores {
        orchestrator = orchestrator.with_score_registry(ledger.clone());
    }
    let summary = orchestrator
        .run_rounds(config.start_round, config.end_round, &clients, &values)
        .await?;

    if let Some(json) = &json_sink {
        json.flush();
    }

    let elapsed = chrono::Utc::now() - started;
    tracing::info!(
        "Finished {} rounds in {}s{}",
        summary.rounds.len(),
        elapsed.num_seconds(),
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    tracing::info!(
        "  Committed: {}, failed: {}, degraded rounds: {}",
        summary.committed(),
        summary.failed(),
        summary.degraded_rounds()
    );
    tracing::info!(
        "  Gas used: {}, cost: {:.6}",
        summary.total_gas_used(),
        summary.total_cost()
    );
    if config.update_scores {
        tracing::info!(
            "  Score updates: {} committed of {}, gas used: {}",
            summary
                .score_updates
                .iter()
                .filter(|u| u.is_committed())
                .count(),
            summary.score_updates.len(),
            summary.score_gas_used()
        );
    }

    let stats = ledger.stats();
    tracing::info!(
        "  Ledger: {} submissions, {} transient, {} fatal, {} lost receipts, {} read failures",
        stats.submissions,
        stats.transient_failures,
        stats.fatal_failures,
        stats.lost_receipts,
        stats.read_failures
    );

    Ok(())
}

fn load_clients(args: &Args, config: &RunConfig) -> Result<Vec<ClientIdentity>> {
    match &args.keys_file {
        Some(path) => {
            let identities = KeyFile::load(path)?.identities()?;
            if args.clients.is_some() && identities.len() != config.clients {
                tracing::warn!(
                    "Ignoring --clients {}: key file holds {} accounts",
                    config.clients,
                    identities.len()
                );
            }
            Ok(identities)
        }
        None => Ok(generate_identities(config.clients, args.seed)),
    }
}
