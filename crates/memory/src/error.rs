//! Error types for the durable stores.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Errors emitted by the fact store, event log, history window and lock.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The persisted file exists but does not hold the expected structure.
    #[error("store at {} is corrupt: {reason}", path.display())]
    CorruptStore { path: PathBuf, reason: String },
    /// Another process held the advisory lock for longer than the bound.
    #[error("timed out after {waited:?} waiting for lock on {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },
    /// Underlying I/O failure on a store file.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Serialization of an in-memory value failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn corrupt(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        Self::CorruptStore {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
