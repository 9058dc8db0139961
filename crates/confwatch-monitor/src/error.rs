//! Error types for the confwatch-monitor crate.

use confwatch_core::DeviceName;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(
        "Counter {counter} on {device} decreased from {stored} to {observed}: \
         monitoring-integrity violation"
    )]
    Rollback {
        device: DeviceName,
        counter: String,
        stored: u64,
        observed: u64,
    },

    #[error("No device could be polled this round: {0}")]
    TotalFailure(String),

    #[error("Device inventory error: {0}")]
    Inventory(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("State store error: {0}")]
    Store(#[from] confwatch_store::StoreError),

    #[error(transparent)]
    Core(#[from] confwatch_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
