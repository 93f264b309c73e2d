//! Cross-process advisory locking and whole-file replacement.
//!
//! A store at `facts.json` is guarded by the marker file `facts.json.lock`.
//! Locking the marker instead of the data file lets writers replace the data
//! file with an atomic rename while the lock is held.
//!
//! The lock is advisory: it only excludes other processes that go through
//! [`StoreLock::acquire`] for the same target.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, trace};

use crate::error::{StoreError, StoreResult};

/// Bounded wait for an exclusive lock before giving up with
/// [`StoreError::LockTimeout`].
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between non-blocking lock attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Path of the marker file guarding `target`.
pub fn lock_path_for(target: &Path) -> PathBuf {
    let filename = target
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "store".to_string());
    target.with_file_name(format!("{filename}.lock"))
}

/// An exclusive advisory lock held on a store's marker file.
///
/// Released when dropped, so every exit path out of a critical section
/// (including `?` early returns) gives the lock back.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Acquire the exclusive lock guarding `target`, polling until `timeout`
    /// elapses.  The marker file and its parent directory are created on
    /// demand.
    pub fn acquire(target: &Path, timeout: Duration) -> StoreResult<Self> {
        let path = lock_path_for(target);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| StoreError::io(&path, err))?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    trace!(path = %path.display(), waited_ms = started.elapsed().as_millis() as u64, "store lock acquired");
                    return Ok(Self { file, path });
                }
                Err(err) if is_contended(&err) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        debug!(path = %path.display(), ?waited, "store lock timed out");
                        return Err(StoreError::LockTimeout { path, waited });
                    }
                    thread::sleep(POLL_INTERVAL.min(timeout - waited));
                }
                Err(err) => return Err(StoreError::io(&path, err)),
            }
        }
    }

    /// Path of the marker file this lock holds.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), %err, "failed to release store lock");
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Replace `path` with `contents` as a whole.
///
/// The bytes go to a `.tmp` sibling which is `fsync`'d and then renamed over
/// the original, so readers observe either the old file or the new one and
/// never a partial write.  The `.tmp` file is removed on any error path.
pub fn replace_file(path: &Path, contents: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;
    }

    let tmp_path = {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "store".to_string());
        path.with_file_name(format!("{filename}.tmp"))
    };

    let written = (|| -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(contents)?;
        file.flush()?;
        file.sync_all()
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::io(&tmp_path, err));
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::io(path, err));
    }
    Ok(())
}
