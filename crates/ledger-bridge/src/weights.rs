//! Weight tables - per-round client values loaded from JSON

use crate::error::BridgeError;
use fl_orchestrator::ValueSource;
use fl_types::Round;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::Path;

/// One value per client index; `null` marks a missing value
pub type WeightRow = Vec<Option<f64>>;

/// Client values by round
///
/// ```json
/// { "default": [0.41, 0.38, null], "rounds": { "3": [0.40, 0.35, 0.52] } }
/// ```
///
/// A round without its own row falls back to `default`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightTable {
    default: Option<WeightRow>,
    rounds: BTreeMap<Round, WeightRow>,
}

impl WeightTable {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, BridgeError> {
        let contents = std::fs::read_to_string(&path)?;
        let table: Self = serde_json::from_str(&contents)?;
        tracing::info!(
            "Loaded weight table from {:?} ({} explicit rounds, default row: {})",
            path.as_ref(),
            table.rounds.len(),
            table.default.is_some()
        );
        Ok(table)
    }

    /// The same row for every round
    pub fn constant(row: WeightRow) -> Self {
        Self {
            default: Some(row),
            rounds: BTreeMap::new(),
        }
    }

    /// Reproducible values in `[0.05, 0.95)` for every round and client
    pub fn synthetic(rounds: RangeInclusive<Round>, clients: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let rounds = rounds
            .map(|round| {
                let row = (0..clients)
                    .map(|_| Some(rng.gen_range(0.05..0.95)))
                    .collect();
                (round, row)
            })
            .collect();
        Self {
            default: None,
            rounds,
        }
    }

    pub fn with_round(mut self, round: Round, row: WeightRow) -> Self {
        self.rounds.insert(round, row);
        self
    }

    pub fn row(&self, round: Round) -> Option<&WeightRow> {
        self.rounds.get(&round).or(self.default.as_ref())
    }
}

impl ValueSource for WeightTable {
    fn value_for(&self, round: Round, client_index: usize) -> Option<f64> {
        self.row(round)?.get(client_index).copied().flatten()
    }
}
