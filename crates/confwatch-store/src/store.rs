//! File-backed snapshot store.
//!
//! One snapshot per file; the encoding is fixed per store instance so a
//! caller can read in one format and write in another.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use confwatch_core::FleetState;

use crate::codec::{CodecError, Encoding};
use crate::{StateSnapshot, SNAPSHOT_VERSION};

/// Errors from snapshot persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("State file not found: {0}")]
    NotFound(PathBuf),

    #[error("Unsupported snapshot version {found} in {path} (expected {expected})")]
    Version {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("Integrity check failed for {0}: stored hash does not match content")]
    Integrity(PathBuf),

    #[error("Failed to decode state file {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("Failed to encode snapshot: {0}")]
    Encode(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Trait for snapshot persistence backends.
pub trait StateStore {
    /// Load the persisted snapshot, verifying version and integrity.
    fn load(&self) -> Result<StateSnapshot>;

    /// Persist the given fleet state as a new snapshot.
    fn save(&self, fleet: &FleetState) -> Result<StateSnapshot>;
}

/// Single-file store with a fixed encoding.
pub struct FileStateStore {
    path: PathBuf,
    encoding: Encoding,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>, encoding: Encoding) -> Self {
        Self {
            path: path.into(),
            encoding,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<StateSnapshot> {
        if !self.path.exists() {
            return Err(StoreError::NotFound(self.path.clone()));
        }

        let bytes = fs::read(&self.path)?;
        let snapshot: StateSnapshot =
            self.encoding
                .decode(&bytes)
                .map_err(|source| StoreError::Decode {
                    path: self.path.clone(),
                    source,
                })?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Version {
                path: self.path.clone(),
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        if !snapshot.verify_integrity() {
            return Err(StoreError::Integrity(self.path.clone()));
        }

        tracing::debug!(
            path = %self.path.display(),
            encoding = %self.encoding,
            devices = snapshot.fleet.len(),
            "State snapshot loaded"
        );

        Ok(snapshot)
    }

    fn save(&self, fleet: &FleetState) -> Result<StateSnapshot> {
        let snapshot = StateSnapshot::seal(fleet.clone(), Utc::now());
        let bytes = self.encoding.encode(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, bytes)?;

        tracing::debug!(
            path = %self.path.display(),
            encoding = %self.encoding,
            devices = fleet.len(),
            "State snapshot saved"
        );

        Ok(snapshot)
    }
}
