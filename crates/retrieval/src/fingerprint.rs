//! Cheap identity of a source file: canonical path plus modification time.
//!
//! Invalidation is modification-time based.  Touching a file without changing
//! its bytes forces a rebuild, and two edits inside one timestamp tick of a
//! coarse filesystem are indistinguishable.  Hashing the content would close
//! that gap at the cost of reading every document on every lookup.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::error::{RetrievalError, RetrievalResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentFingerprint {
    pub absolute_path: PathBuf,
    /// Modification time in nanoseconds since the Unix epoch.
    pub last_modified_ns: u64,
}

impl ContentFingerprint {
    /// Stat `path` now.  Never cached: every lookup recomputes it.
    pub fn compute(path: impl AsRef<Path>) -> RetrievalResult<Self> {
        let path = path.as_ref();
        let absolute_path =
            fs::canonicalize(path).map_err(|err| RetrievalError::from_io(path, err))?;
        let metadata =
            fs::metadata(&absolute_path).map_err(|err| RetrievalError::from_io(path, err))?;
        if !metadata.is_file() {
            return Err(RetrievalError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let modified = metadata
            .modified()
            .map_err(|err| RetrievalError::from_io(path, err))?;
        let last_modified_ns = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);

        Ok(Self {
            absolute_path,
            last_modified_ns,
        })
    }

    pub fn file_name(&self) -> String {
        self.absolute_path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}
