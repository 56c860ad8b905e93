//! Lease files in a shared directory.
//!
//! ```text
//! <dir>/
//!   .guard                         (fs2 exclusive lock serializes every operation)
//!   texsync_repo_<hex>.lease       ({"owner": …, "acquired_at": …, "expires_at": …})
//! ```
//!
//! Works across processes on one host, or across hosts on a shared
//! filesystem with working `flock`. Expired leases are treated as absent.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use texsync_core::OwnerToken;

use super::LeaseStore;
use crate::error::{io_err, SyncError};

const GUARD_FILE: &str = ".guard";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseFile {
    owner: OwnerToken,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl LeaseFile {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone)]
pub struct FileLeaseStore {
    dir: PathBuf,
}

impl FileLeaseStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lease_path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.lease"))
    }

    /// Run `f` while holding the directory guard.
    fn guarded<T>(&self, f: impl FnOnce() -> Result<T, SyncError>) -> Result<T, SyncError> {
        let guard_path = self.dir.join(GUARD_FILE);
        let guard = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&guard_path)
            .map_err(|e| io_err(&guard_path, e))?;
        guard
            .lock_exclusive()
            .map_err(|e| io_err(&guard_path, e))?;
        let result = f();
        if let Err(e) = guard.unlock() {
            tracing::warn!("failed to unlock {}: {e}", guard_path.display());
        }
        result
    }

    /// Live lease for `key`; expired or unreadable files count as absent.
    fn read_live(&self, path: &Path) -> Result<Option<LeaseFile>, SyncError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(path, e)),
        };
        match serde_json::from_str::<LeaseFile>(&contents) {
            Ok(lease) if lease.is_live(Utc::now()) => Ok(Some(lease)),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::warn!("ignoring corrupt lease file {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    fn write_lease(&self, path: &Path, lease: &LeaseFile) -> Result<(), SyncError> {
        let json = serde_json::to_string(lease)?;
        let tmp = path.with_extension("lease.tmp");
        let mut file = File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
        std::io::Write::write_all(&mut file, json.as_bytes()).map_err(|e| io_err(&tmp, e))?;
        file.sync_all().map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
        Ok(())
    }
}

impl LeaseStore for FileLeaseStore {
    fn set_if_absent(
        &self,
        key: &str,
        owner: &OwnerToken,
        ttl: Duration,
    ) -> Result<bool, SyncError> {
        let path = self.lease_path(key);
        self.guarded(|| {
            if self.read_live(&path)?.is_some() {
                return Ok(false);
            }
            let now = Utc::now();
            let ttl = chrono::Duration::from_std(ttl)
                .map_err(|e| SyncError::LockStore(format!("invalid ttl: {e}")))?;
            self.write_lease(
                &path,
                &LeaseFile {
                    owner: owner.clone(),
                    acquired_at: now,
                    expires_at: now + ttl,
                },
            )?;
            Ok(true)
        })
    }

    fn compare_and_delete(&self, key: &str, owner: &OwnerToken) -> Result<bool, SyncError> {
        let path = self.lease_path(key);
        self.guarded(|| match self.read_live(&path)? {
            Some(lease) if &lease.owner == owner => {
                std::fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    fn holder(&self, key: &str) -> Result<Option<OwnerToken>, SyncError> {
        let path = self.lease_path(key);
        self.guarded(|| Ok(self.read_live(&path)?.map(|l| l.owner)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn two_stores_on_one_dir_exclude_each_other() {
        let tmp = TempDir::new().unwrap();
        let first = FileLeaseStore::new(tmp.path()).unwrap();
        let second = FileLeaseStore::new(tmp.path()).unwrap();
        let a = OwnerToken::from("a");
        let b = OwnerToken::from("b");

        assert!(first.set_if_absent("texsync:repo:x", &a, Duration::from_secs(30)).unwrap());
        assert!(!second.set_if_absent("texsync:repo:x", &b, Duration::from_secs(30)).unwrap());
        assert!(!second.compare_and_delete("texsync:repo:x", &b).unwrap());
        assert_eq!(second.holder("texsync:repo:x").unwrap(), Some(a.clone()));
        assert!(first.compare_and_delete("texsync:repo:x", &a).unwrap());
        assert!(second.set_if_absent("texsync:repo:x", &b, Duration::from_secs(30)).unwrap());
    }

    #[test]
    fn expired_lease_file_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let store = FileLeaseStore::new(tmp.path()).unwrap();
        let a = OwnerToken::from("a");
        assert!(store.set_if_absent("k", &a, Duration::from_millis(10)).unwrap());
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(store.holder("k").unwrap(), None);
        assert!(store
            .set_if_absent("k", &OwnerToken::from("b"), Duration::from_secs(1))
            .unwrap());
    }

    #[test]
    fn corrupt_lease_file_counts_as_absent() {
        let tmp = TempDir::new().unwrap();
        let store = FileLeaseStore::new(tmp.path()).unwrap();
        std::fs::write(store.lease_path("k"), "{not json").unwrap();
        assert!(store
            .set_if_absent("k", &OwnerToken::from("a"), Duration::from_secs(1))
            .unwrap());
    }
}
