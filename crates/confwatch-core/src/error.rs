use thiserror::Error;

/// Top-level error type shared across confwatch crates.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid counter set: {0}")]
    CounterSet(String),

    #[error("Invalid device inventory: {0}")]
    Inventory(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
