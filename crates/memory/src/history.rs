//! Per-session conversation history with a fixed sliding window.
//!
//! Each session id maps to `{dir}/{session}.json`, a JSON array of turns.
//! After every append the persisted sequence is cut back to the newest `W`
//! turns.  Dropped turns are gone for good; anything worth keeping must be
//! written to the [`FactStore`](crate::FactStore) or
//! [`EventLog`](crate::EventLog) first.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::lock::{DEFAULT_LOCK_TIMEOUT, StoreLock, replace_file};

/// Number of turns kept per session.
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Ok(Self::User),
            "assistant" | "ai" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

impl HistoryTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryWindow {
    dir: PathBuf,
    window: usize,
    lock_timeout: Duration,
}

impl HistoryWindow {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            window: DEFAULT_HISTORY_WINDOW,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Override the window size `W`.  A window of zero is treated as one.
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", sanitize_file_stem(session_id)))
    }

    /// Persisted turns for `session_id`, oldest first.  A session with no
    /// file yet has an empty history.
    pub fn load(&self, session_id: &str) -> StoreResult<Vec<HistoryTurn>> {
        read_turns(&self.session_path(session_id))
    }

    /// Append `turn` and truncate the session to the newest `W` turns.
    pub fn append(&self, session_id: &str, turn: HistoryTurn) -> StoreResult<()> {
        let path = self.session_path(session_id);
        let _lock = StoreLock::acquire(&path, self.lock_timeout)?;

        let mut turns = read_turns(&path)?;
        turns.push(turn);
        if turns.len() > self.window {
            let dropped = turns.len() - self.window;
            turns.drain(..dropped);
            debug!(session = session_id, dropped, "history window truncated");
        }

        let rendered = serde_json::to_string_pretty(&turns)?;
        replace_file(&path, rendered.as_bytes())
    }

    /// Delete the session's history file.
    pub fn clear(&self, session_id: &str) -> StoreResult<()> {
        let path = self.session_path(session_id);
        let _lock = StoreLock::acquire(&path, self.lock_timeout)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(session = session_id, "history cleared");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::io(&path, err)),
        }
    }
}

fn read_turns(path: &Path) -> StoreResult<Vec<HistoryTurn>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(StoreError::io(path, err)),
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw).map_err(|err| StoreError::corrupt(path, err))
}

/// Map an arbitrary id onto a safe file stem: anything outside
/// `[A-Za-z0-9_-]` becomes `_`.
pub(crate) fn sanitize_file_stem(id: &str) -> String {
    let stem: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() { "default".to_string() } else { stem }
}
