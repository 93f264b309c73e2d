use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root for every store the assistant writes: facts, event log, history
    /// and the on-disk index cache.
    pub data_dir: String,
    /// Directory of documents that retrieval may read.
    pub knowledge_base: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: ".ragdesk".to_string(),
            knowledge_base: "knowledge_base".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared between neighbouring chunks.
    pub chunk_overlap: usize,
    /// Passages returned per query.
    pub top_k: usize,
    /// Embedding backend: `hashing` (offline, deterministic) or `ollama`.
    pub embedder: String,
    pub hashing_dimension: usize,
    pub ollama_model: String,
    /// Overridden at runtime by `OLLAMA_BASE_URL` when set.
    pub ollama_base_url: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            top_k: 3,
            embedder: "hashing".to_string(),
            hashing_dimension: 256,
            ollama_model: "nomic-embed-text".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Turns kept per history session.
    pub history_window: usize,
    /// Bounded wait for a store's advisory lock.
    pub lock_timeout_ms: u64,
    /// Fact store profile used when the CLI is not given one.
    pub profile: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            history_window: 10,
            lock_timeout_ms: 5_000,
            profile: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub retrieval: RetrievalConfig,
    pub memory: MemoryConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load `path`, falling back to defaults when it does not exist, then
    /// apply environment overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = match fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                return Err(err).with_context(|| format!("reading config {}", path.display()));
            }
        };
        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// Apply `RAGDESK_DATA_DIR`, `RAGDESK_KNOWLEDGE_BASE` and
    /// `OLLAMA_BASE_URL` as looked up by `lookup`.  Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        if let Some(value) = get("RAGDESK_DATA_DIR") {
            self.paths.data_dir = value;
        }
        if let Some(value) = get("RAGDESK_KNOWLEDGE_BASE") {
            self.paths.knowledge_base = value;
        }
        if let Some(value) = get("OLLAMA_BASE_URL") {
            self.retrieval.ollama_base_url = value;
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.data_dir)
    }

    pub fn knowledge_base_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.knowledge_base)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir().join("vector_cache")
    }

    pub fn facts_dir(&self) -> PathBuf {
        self.data_dir().join("facts")
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.data_dir().join("events.jsonl")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.data_dir().join("history")
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
