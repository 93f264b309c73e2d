//! Two-tier cache of vector indexes keyed by document identity.
//!
//! Lookups walk the tiers in strict order and stop at the first hit:
//!
//! | Tier | Storage                                   | Valid when                          |
//! |------|-------------------------------------------|-------------------------------------|
//! | L1   | in-process `HashMap`                      | stored fingerprint == current       |
//! | L2   | `{cache_dir}/{key}/index.json` + sidecar  | sidecar fingerprint == current      |
//! | L3   | caller-supplied build closure             | always (builds from current source) |
//!
//! The fingerprint is recomputed on every call, so an external edit to a
//! document is always noticed.  L2 failures degrade to a rebuild and are only
//! logged.  There is no eviction: both tiers grow with the document set.

use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ragdesk_memory::StoreLock;
use ragdesk_memory::lock::replace_file;
use ragdesk_memory::{DEFAULT_LOCK_TIMEOUT, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{RetrievalError, RetrievalResult};
use crate::fingerprint::ContentFingerprint;
use crate::index::VectorIndex;

/// Serialized index inside an entry directory.
pub const INDEX_FILE: &str = "index.json";
/// Sidecar recording the fingerprint the index was built from.
pub const METADATA_FILE: &str = "meta.json";
/// Current sidecar format version.
pub const METADATA_VERSION: u32 = 1;

/// Which tier satisfied a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Memory,
    Disk,
    Rebuilt,
}

/// Sidecar written next to a persisted index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub version: u32,
    pub source_file_name: String,
    #[serde(flatten)]
    pub fingerprint: ContentFingerprint,
    pub embedder: String,
    pub chunk_count: usize,
    pub built_at: DateTime<Utc>,
}

struct CacheEntry {
    fingerprint: ContentFingerprint,
    embedder: String,
    index: Arc<VectorIndex>,
}

/// Explicit cache handle.  The owner passes it by `&mut` into every
/// retrieval call, so the memory tier has a single writer.
pub struct VectorIndexCache {
    cache_dir: PathBuf,
    entries: HashMap<PathBuf, CacheEntry>,
    lock_timeout: Duration,
}

impl VectorIndexCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            entries: HashMap::new(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Number of documents held in the memory tier.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the memory tier holds an entry for `document`, fresh or not.
    pub fn contains(&self, document: &Path) -> bool {
        fs::canonicalize(document)
            .map(|path| self.entries.contains_key(&path))
            .unwrap_or(false)
    }

    /// Return an index for `document` built from its current content.
    ///
    /// `build` parses, chunks and embeds the document; it only runs when
    /// neither tier holds an index matching the current fingerprint and
    /// `embedder_id`.  A failed build leaves both tiers untouched.
    pub async fn get_or_build<F, Fut>(
        &mut self,
        document: &Path,
        embedder_id: &str,
        build: F,
    ) -> RetrievalResult<Arc<VectorIndex>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RetrievalResult<VectorIndex>>,
    {
        self.get_or_build_traced(document, embedder_id, build)
            .await
            .map(|(index, _)| index)
    }

    /// [`get_or_build`](Self::get_or_build), also reporting the tier that
    /// served the lookup.
    pub async fn get_or_build_traced<F, Fut>(
        &mut self,
        document: &Path,
        embedder_id: &str,
        build: F,
    ) -> RetrievalResult<(Arc<VectorIndex>, CacheTier)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RetrievalResult<VectorIndex>>,
    {
        let fingerprint = ContentFingerprint::compute(document)?;

        // L1: memory.
        if let Some(entry) = self.entries.get(&fingerprint.absolute_path) {
            if entry.fingerprint == fingerprint && entry.embedder == embedder_id {
                debug!(document = %fingerprint.absolute_path.display(), "index served from memory");
                return Ok((Arc::clone(&entry.index), CacheTier::Memory));
            }
            debug!(document = %fingerprint.absolute_path.display(), "memory entry is stale");
        }

        // L2: disk.
        let entry_dir = self.entry_dir(&fingerprint);
        if let Some(index) = self.load_from_disk(&entry_dir, &fingerprint, embedder_id) {
            debug!(document = %fingerprint.absolute_path.display(), chunks = index.len(), "index served from disk");
            let index = self.install(fingerprint, embedder_id, Arc::new(index));
            return Ok((index, CacheTier::Disk));
        }

        // L3: rebuild from source.
        let index = build().await?;
        if index.is_empty() {
            return Err(RetrievalError::EmptyContent {
                path: fingerprint.absolute_path.clone(),
            });
        }
        info!(
            document = %fingerprint.absolute_path.display(),
            chunks = index.len(),
            embedder = embedder_id,
            "index rebuilt from source"
        );

        let metadata = IndexMetadata {
            version: METADATA_VERSION,
            source_file_name: fingerprint.file_name(),
            fingerprint: fingerprint.clone(),
            embedder: embedder_id.to_string(),
            chunk_count: index.len(),
            built_at: Utc::now(),
        };
        let index = Arc::new(index);

        // Lock waits and fsyncs block, so they run off the async worker.
        let persisted = {
            let entry_dir = entry_dir.clone();
            let index = Arc::clone(&index);
            let lock_timeout = self.lock_timeout;
            tokio::task::spawn_blocking(move || persist(&entry_dir, &metadata, &index, lock_timeout))
                .await
        };
        match persisted {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                %err,
                dir = %entry_dir.display(),
                "failed to persist index to disk cache; continuing with in-memory copy"
            ),
            Err(err) => warn!(%err, dir = %entry_dir.display(), "index persist task failed"),
        }

        let index = self.install(fingerprint, embedder_id, index);
        Ok((index, CacheTier::Rebuilt))
    }

    fn install(
        &mut self,
        fingerprint: ContentFingerprint,
        embedder_id: &str,
        index: Arc<VectorIndex>,
    ) -> Arc<VectorIndex> {
        self.entries.insert(
            fingerprint.absolute_path.clone(),
            CacheEntry {
                fingerprint,
                embedder: embedder_id.to_string(),
                index: Arc::clone(&index),
            },
        );
        index
    }

    /// `{cache_dir}/{file-stem}-{hash of absolute path}`: readable, and
    /// distinct for equally named documents in different directories.
    fn entry_dir(&self, fingerprint: &ContentFingerprint) -> PathBuf {
        let digest = Sha256::digest(fingerprint.absolute_path.to_string_lossy().as_bytes());
        let hash: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        let stem: String = fingerprint
            .absolute_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .take(48)
            .collect();
        self.cache_dir.join(format!("{stem}-{hash}"))
    }

    /// Read a persisted index if its sidecar matches.  Every failure is a
    /// miss: missing files silently, anything else with a warning.
    fn load_from_disk(
        &self,
        entry_dir: &Path,
        fingerprint: &ContentFingerprint,
        embedder_id: &str,
    ) -> Option<VectorIndex> {
        let metadata_path = entry_dir.join(METADATA_FILE);
        let raw = match fs::read_to_string(&metadata_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(%err, path = %metadata_path.display(), "unreadable index sidecar; rebuilding");
                return None;
            }
        };
        let metadata: IndexMetadata = match serde_json::from_str(&raw) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(%err, path = %metadata_path.display(), "corrupt index sidecar; rebuilding");
                return None;
            }
        };
        if metadata.version != METADATA_VERSION
            || metadata.fingerprint != *fingerprint
            || metadata.embedder != embedder_id
        {
            debug!(path = %metadata_path.display(), "disk index is stale");
            return None;
        }

        let index_path = entry_dir.join(INDEX_FILE);
        let index: VectorIndex = match fs::read(&index_path)
            .map_err(|err| err.to_string())
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|err| err.to_string()))
        {
            Ok(index) => index,
            Err(err) => {
                warn!(%err, path = %index_path.display(), "corrupt persisted index; rebuilding");
                return None;
            }
        };
        if index.len() != metadata.chunk_count || index.embedder() != embedder_id || index.is_empty() {
            warn!(path = %index_path.display(), "persisted index disagrees with its sidecar; rebuilding");
            return None;
        }
        Some(index)
    }
}

/// Write index and sidecar under the entry's lock.  The old sidecar is
/// removed first so a crash mid-write can never pair a new index with a
/// sidecar that vouches for it.
fn persist(
    entry_dir: &Path,
    metadata: &IndexMetadata,
    index: &VectorIndex,
    lock_timeout: Duration,
) -> Result<(), StoreError> {
    fs::create_dir_all(entry_dir).map_err(|err| StoreError::io(entry_dir, err))?;
    let _lock = StoreLock::acquire(entry_dir, lock_timeout)?;

    let metadata_path = entry_dir.join(METADATA_FILE);
    match fs::remove_file(&metadata_path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(StoreError::io(&metadata_path, err)),
    }

    replace_file(&entry_dir.join(INDEX_FILE), &serde_json::to_vec(index)?)?;
    replace_file(&metadata_path, &serde_json::to_vec_pretty(metadata)?)?;
    debug!(dir = %entry_dir.display(), "index persisted to disk cache");
    Ok(())
}
