//! Ledger Bridge - adapters between the orchestrator and a ledger
//!
//! Provides:
//! - An in-process simulated ledger with fault injection
//! - ed25519 client identities and JSON key files
//! - JSON weight tables as a value source

pub mod error;
pub mod keys;
pub mod simulated;
pub mod weights;

pub use error::BridgeError;
pub use keys::{generate_identities, verify, KeyFile, KeypairSigner};
pub use simulated::{FaultProfile, LedgerStats, SimulatedLedger};
pub use weights::WeightTable;
