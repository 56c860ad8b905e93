//! Serialized, durable writes to the local document.
//!
//! ## `LocalFileGuard::write` protocol
//!
//! 1. Open (create) the sibling `<path>.lock`.
//! 2. Non-blocking exclusive `fs2` lock, retried `max_attempts` times with a
//!    fixed delay.
//! 3. Write the content, `flush`, `sync_all`.
//! 4. Remove the lock file and unlock (RAII, so every exit path releases).
//!
//! The guard overwrites unconditionally. Callers decide what content is safe
//! to write.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use fs2::FileExt;

use texsync_core::config::FileLockConfig;
use texsync_core::content_digest;

use crate::error::{io_err, SyncError};

/// Suffix of the advisory lock file placed next to the guarded file.
pub const LOCK_SUFFIX: &str = ".lock";

/// What a successful guarded write produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub path: PathBuf,
    /// SHA-256 of the bytes now on disk.
    pub digest: String,
}

/// Advisory-lock writer for files shared with other local processes.
#[derive(Debug, Clone)]
pub struct LocalFileGuard {
    max_attempts: u32,
    retry_delay: Duration,
}

impl Default for LocalFileGuard {
    fn default() -> Self {
        Self::from_config(&FileLockConfig::default())
    }
}

impl LocalFileGuard {
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    pub fn from_config(config: &FileLockConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.retry_delay_ms),
        )
    }

    /// `<path>.lock`
    pub fn lock_path(path: &Path) -> PathBuf {
        let mut os = path.as_os_str().to_owned();
        os.push(LOCK_SUFFIX);
        PathBuf::from(os)
    }

    /// Write `content` to `path` while holding the sibling advisory lock.
    ///
    /// Fails with [`SyncError::LockTimeout`] once the retry budget is spent.
    pub fn write(&self, path: &Path, content: &str) -> Result<WriteReceipt, SyncError> {
        let held = self.acquire(path)?;
        let result = write_synced(path, content);
        drop(held);
        result?;
        tracing::debug!("guarded write: {}", path.display());
        Ok(WriteReceipt {
            path: path.to_path_buf(),
            digest: content_digest(content),
        })
    }

    /// Read the current content under the same lock writers take.
    pub fn read(&self, path: &Path) -> Result<String, SyncError> {
        let _held = self.acquire(path)?;
        std::fs::read_to_string(path).map_err(|e| io_err(path, e))
    }

    fn acquire(&self, path: &Path) -> Result<HeldLock, SyncError> {
        let lock_path = Self::lock_path(path);
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
        }

        for attempt in 1..=self.max_attempts {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)
                .map_err(|e| io_err(&lock_path, e))?;

            match file.try_lock_exclusive() {
                // A holder may have removed the file between our open and lock.
                Ok(()) if still_linked(&file, &lock_path) => {
                    return Ok(HeldLock {
                        file,
                        path: lock_path,
                    })
                }
                Ok(()) => {
                    let _ = file.unlock();
                    tracing::debug!("lock file replaced under us: {}", lock_path.display());
                }
                Err(e) if is_contended(&e) => {
                    tracing::debug!(
                        "lock busy: {} (attempt {attempt}/{})",
                        lock_path.display(),
                        self.max_attempts
                    );
                }
                Err(e) => return Err(io_err(&lock_path, e)),
            }

            if attempt < self.max_attempts {
                thread::sleep(self.retry_delay);
            }
        }

        tracing::warn!(
            "gave up locking {} after {} attempts",
            path.display(),
            self.max_attempts
        );
        Err(SyncError::LockTimeout {
            path: path.to_path_buf(),
            attempts: self.max_attempts,
        })
    }
}

/// Write, flush and fsync without any locking.
///
/// Used for the repository copy, which the distributed lease already guards.
pub fn write_durable(path: &Path, content: &str) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }
    write_synced(path, content)
}

fn write_synced(path: &Path, content: &str) -> Result<(), SyncError> {
    let mut file = File::create(path).map_err(|e| io_err(path, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| io_err(path, e))?;
    file.flush().map_err(|e| io_err(path, e))?;
    file.sync_all().map_err(|e| io_err(path, e))?;
    Ok(())
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(on_disk)) => held.ino() == on_disk.ino() && held.dev() == on_disk.dev(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}

/// An acquired advisory lock. Unlocks and removes the lock file on drop.
struct HeldLock {
    file: File,
    path: PathBuf,
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        // Unlink while still holding, so late openers of this inode retry.
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove lock file {}: {e}", self.path.display());
            }
        }
        if let Err(e) = self.file.unlock() {
            tracing::warn!("failed to unlock {}: {e}", self.path.display());
        }
    }
}
