//! confwatch-store — persisted comparison state for the fleet monitor.
//!
//! Snapshots are stored as a single file in one of three interchangeable
//! encodings (JSON, YAML, MessagePack). Every snapshot carries a BLAKE3
//! content hash over the fleet state so corruption is detected on load.

pub mod codec;
pub mod hash;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use confwatch_core::FleetState;

pub use codec::Encoding;
pub use store::{FileStateStore, StateStore, StoreError};

/// Current snapshot envelope version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A persisted snapshot of the full fleet comparison state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateSnapshot {
    /// Envelope format version.
    pub version: u32,
    /// When this snapshot was written.
    pub saved_at: DateTime<Utc>,
    /// BLAKE3 hash (hex) over the canonical JSON of `fleet`.
    pub integrity: String,
    pub fleet: FleetState,
}

impl StateSnapshot {
    /// Wrap a fleet state in a sealed envelope.
    pub fn seal(fleet: FleetState, saved_at: DateTime<Utc>) -> Self {
        let integrity = hash::fleet_hash(&fleet);
        Self {
            version: SNAPSHOT_VERSION,
            saved_at,
            integrity,
            fleet,
        }
    }

    /// Verify that the stored integrity hash matches the fleet content.
    pub fn verify_integrity(&self) -> bool {
        self.integrity == hash::fleet_hash(&self.fleet)
    }
}
