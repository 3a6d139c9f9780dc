use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid key at index {index}: {reason}")]
    InvalidKey { index: usize, reason: String },

    #[error("Address mismatch at index {index}: file says {declared}, key derives {derived}")]
    AddressMismatch {
        index: usize,
        declared: String,
        derived: String,
    },

    #[error("Key file contains no accounts")]
    EmptyKeyFile,
}
