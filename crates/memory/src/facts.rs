//! Durable key → value facts (preferences, watch-lists, standing
//! instructions) that outlive the truncated conversation history.
//!
//! The backing file is a single JSON object rewritten as a whole on every
//! upsert.  Writers serialise through the store's advisory lock; readers take
//! a lock-free snapshot.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::lock::{DEFAULT_LOCK_TIMEOUT, StoreLock, replace_file};

#[derive(Debug, Clone)]
pub struct FactStore {
    path: PathBuf,
    lock_timeout: Duration,
}

impl FactStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// The store for one profile: `{dir}/facts-{profile}.json`.
    pub fn for_profile(dir: impl AsRef<Path>, profile: &str) -> Self {
        let profile = crate::history::sanitize_file_stem(profile);
        Self::new(dir.as_ref().join(format!("facts-{profile}.json")))
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set `key` to `value`, replacing any previous value.
    ///
    /// The read-modify-write runs under the exclusive lock so concurrent
    /// upserts of different keys from separate processes never lose each
    /// other's writes.
    pub fn upsert(&self, key: &str, value: &str) -> StoreResult<()> {
        self.ensure_initialized()?;

        let _lock = StoreLock::acquire(&self.path, self.lock_timeout)?;
        let mut facts = self.read_all()?;
        let replaced = facts.insert(key.to_string(), value.to_string()).is_some();

        let rendered = serde_json::to_string_pretty(&facts)?;
        replace_file(&self.path, rendered.as_bytes())?;
        info!(key, replaced, total = facts.len(), path = %self.path.display(), "fact upserted");
        Ok(())
    }

    /// Snapshot of every stored fact, without taking the lock.
    ///
    /// A missing or empty file reads as an empty map.
    pub fn read_all(&self) -> StoreResult<BTreeMap<String, String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(err) => return Err(StoreError::io(&self.path, err)),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|err| StoreError::corrupt(&self.path, err))
    }

    /// Facts formatted as a prompt context block, or `None` when the store is
    /// empty.
    pub fn render_prompt_block(&self) -> StoreResult<Option<String>> {
        let facts = self.read_all()?;
        if facts.is_empty() {
            return Ok(None);
        }
        let mut block = String::from("Known facts about the user:\n");
        for (key, value) in &facts {
            block.push_str(&format!("- {key}: {value}\n"));
        }
        Ok(Some(block))
    }

    /// Create the backing file holding `{}` if it does not exist yet.
    ///
    /// `create_new` makes this a no-op when another process wins the race, so
    /// an already-populated store is never reset.
    fn ensure_initialized(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                file.write_all(b"{}")
                    .map_err(|err| StoreError::io(&self.path, err))?;
                debug!(path = %self.path.display(), "initialized empty fact store");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(StoreError::io(&self.path, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::process::Command;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    const CHILD_STORE_VAR: &str = "RAGDESK_FACTS_CHILD_STORE";
    const CHILD_PREFIX_VAR: &str = "RAGDESK_FACTS_CHILD_PREFIX";
    const CHILD_ROUNDS: usize = 10;

    #[test]
    fn read_all_on_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FactStore::new(dir.path().join("facts.json"));
        assert!(store.read_all().unwrap().is_empty());
        assert!(!store.path().exists(), "reads must not create the file");
    }

    #[test]
    fn upsert_initializes_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = FactStore::new(dir.path().join("nested").join("facts.json"));
        store.upsert("risk", "low").unwrap();
        let facts = store.read_all().unwrap();
        assert_eq!(facts.get("risk").map(String::as_str), Some("low"));
    }

    #[test]
    fn upsert_overwrites_only_the_given_key() {
        let dir = TempDir::new().unwrap();
        let store = FactStore::new(dir.path().join("facts.json"));
        store.upsert("watch", "AAPL").unwrap();
        store.upsert("currency", "USD").unwrap();
        store.upsert("watch", "MSFT").unwrap();

        let facts = store.read_all().unwrap();
        assert_eq!(facts.len(), 2);
        assert_eq!(facts["watch"], "MSFT");
        assert_eq!(facts["currency"], "USD");
    }

    #[test]
    fn concurrent_upserts_on_different_keys_all_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("facts.json");
        let workers = 8;
        let barrier = Arc::new(Barrier::new(workers));

        let handles: Vec<_> = (0..workers)
            .map(|i| {
                // Each worker opens its own store handle, and so its own lock
                // file descriptor, like a separate process would.
                let store = FactStore::new(&path);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store.upsert(&format!("key-{i}"), &format!("value-{i}")).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let facts = FactStore::new(&path).read_all().unwrap();
        assert_eq!(facts.len(), workers);
        for i in 0..workers {
            assert_eq!(facts[&format!("key-{i}")], format!("value-{i}"));
        }
    }

    /// Worker body for `upserts_from_separate_processes_all_persist`.  Does
    /// nothing unless launched by that test with the store path in the
    /// environment.
    #[test]
    fn upsert_worker_process() {
        let (Ok(path), Ok(prefix)) = (env::var(CHILD_STORE_VAR), env::var(CHILD_PREFIX_VAR)) else {
            return;
        };
        let store = FactStore::new(path);
        for round in 0..CHILD_ROUNDS {
            store.upsert(&format!("{prefix}-{round}"), &round.to_string()).unwrap();
        }
    }

    #[test]
    fn upserts_from_separate_processes_all_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("facts.json");
        let exe = env::current_exe().unwrap();
        let processes = 4;

        let children: Vec<_> = (0..processes)
            .map(|i| {
                Command::new(&exe)
                    .args(["facts::tests::upsert_worker_process", "--exact", "--test-threads=1"])
                    .env(CHILD_STORE_VAR, &path)
                    .env(CHILD_PREFIX_VAR, format!("proc{i}"))
                    .spawn()
                    .unwrap()
            })
            .collect();
        for mut child in children {
            assert!(child.wait().unwrap().success());
        }

        let facts = FactStore::new(&path).read_all().unwrap();
        assert_eq!(facts.len(), processes * CHILD_ROUNDS);
        for i in 0..processes {
            for round in 0..CHILD_ROUNDS {
                assert_eq!(facts[&format!("proc{i}-{round}")], round.to_string());
            }
        }
    }

    #[test]
    fn held_lock_makes_upsert_time_out_without_touching_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("facts.json");
        let store = FactStore::new(&path).with_lock_timeout(Duration::from_millis(100));
        store.upsert("keep", "me").unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let _held = StoreLock::acquire(&path, DEFAULT_LOCK_TIMEOUT).unwrap();
        let err = store.upsert("blocked", "value").unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }), "got {err:?}");

        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn malformed_file_is_reported_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("facts.json");
        fs::write(&path, "[not, a map").unwrap();
        let store = FactStore::new(&path);

        assert!(matches!(store.read_all(), Err(StoreError::CorruptStore { .. })));
        assert!(matches!(
            store.upsert("k", "v"),
            Err(StoreError::CorruptStore { .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), "[not, a map");
    }

    #[test]
    fn profile_stores_are_separate_files() {
        let dir = TempDir::new().unwrap();
        let alice = FactStore::for_profile(dir.path(), "alice");
        let bob = FactStore::for_profile(dir.path(), "../bob");
        alice.upsert("name", "Alice").unwrap();
        bob.upsert("name", "Bob").unwrap();

        assert_eq!(alice.read_all().unwrap()["name"], "Alice");
        assert_eq!(bob.read_all().unwrap()["name"], "Bob");
        assert!(bob.path().starts_with(dir.path()));
    }

    #[test]
    fn prompt_block_lists_facts_in_key_order() {
        let dir = TempDir::new().unwrap();
        let store = FactStore::new(dir.path().join("facts.json"));
        assert!(store.render_prompt_block().unwrap().is_none());

        store.upsert("b", "2").unwrap();
        store.upsert("a", "1").unwrap();
        let block = store.render_prompt_block().unwrap().unwrap();
        assert!(block.contains("- a: 1\n- b: 2\n"), "{block}");
    }
}
