use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::lock::{DEFAULT_LOCK_TIMEOUT, StoreLock};

/// One discrete event (a trade, a report written, a tool side effect).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unix time in fractional seconds.
    pub timestamp: f64,
    pub action: String,
    pub target: String,
    pub details: String,
}

impl EventRecord {
    pub fn now(
        action: impl Into<String>,
        target: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
            action: action.into(),
            target: target.into(),
            details: details.into(),
        }
    }
}

/// Append-only JSONL journal.  Lines are never read back or rewritten here;
/// analysis of the journal happens elsewhere.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    lock_timeout: Duration,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &EventRecord) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _lock = StoreLock::acquire(&self.path, self.lock_timeout)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| StoreError::io(&self.path, err))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            // fsync so the entry survives a crash right after append.
            .and_then(|()| file.sync_all())
            .map_err(|err| StoreError::io(&self.path, err))?;

        tracing::debug!(
            action = %record.action,
            target = %record.target,
            path = %self.path.display(),
            "event appended"
        );
        Ok(())
    }
}
