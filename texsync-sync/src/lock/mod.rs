//! Cross-process mutual exclusion per remote repository.
//!
//! A lease is a key holding an owner token with a TTL. Acquire is an atomic
//! set-if-absent; release is an atomic compare-and-delete on the owner token,
//! so an expired holder can never delete a successor's lease.
//!
//! Backends implement [`LeaseStore`]; [`DistributedLock`] adds the retry
//! budget and the RAII [`LeaseGuard`].

mod file;
mod memory;

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;

use texsync_core::config::{DistributedLockConfig, LockBackend};
use texsync_core::{LockLease, OwnerToken};

use crate::error::SyncError;

pub use file::FileLeaseStore;
pub use memory::MemoryLeaseStore;

/// Atomic primitives a lease backend must provide.
pub trait LeaseStore: Send + Sync {
    /// Store `owner` under `key` unless a live lease exists. `true` on success.
    fn set_if_absent(&self, key: &str, owner: &OwnerToken, ttl: Duration)
        -> Result<bool, SyncError>;

    /// Delete `key` only if it still holds `owner`. `true` if deleted.
    fn compare_and_delete(&self, key: &str, owner: &OwnerToken) -> Result<bool, SyncError>;

    /// Current live holder of `key`, if any.
    fn holder(&self, key: &str) -> Result<Option<OwnerToken>, SyncError>;
}

/// Build the store named by the config. `default_dir` backs the `file`
/// backend when no directory is configured.
pub fn open_store(
    config: &DistributedLockConfig,
    default_dir: &Path,
) -> Result<Arc<dyn LeaseStore>, SyncError> {
    match config.backend {
        LockBackend::Memory => Ok(Arc::new(MemoryLeaseStore::new())),
        LockBackend::File => {
            let dir = config.dir.as_deref().unwrap_or(default_dir);
            Ok(Arc::new(FileLeaseStore::new(dir)?))
        }
    }
}

/// Lease-based lock with a bounded retry budget.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn LeaseStore>,
    ttl: Duration,
    retries: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("ttl", &self.ttl)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl DistributedLock {
    pub fn new(store: Arc<dyn LeaseStore>, ttl: Duration, retries: u32, retry_delay: Duration) -> Self {
        Self {
            store,
            ttl,
            retries: retries.max(1),
            retry_delay,
        }
    }

    pub fn from_config(store: Arc<dyn LeaseStore>, config: &DistributedLockConfig) -> Self {
        Self::new(
            store,
            Duration::from_millis(config.ttl_ms),
            config.retries,
            Duration::from_millis(config.retry_delay_ms),
        )
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// One atomic attempt.
    pub fn acquire(&self, key: &str, owner: &OwnerToken, ttl: Duration) -> Result<bool, SyncError> {
        self.store.set_if_absent(key, owner, ttl)
    }

    /// Compare-and-delete. A mismatch means the lease expired under us and
    /// someone else took it; logged, never fatal.
    pub fn release(&self, key: &str, owner: &OwnerToken) -> Result<bool, SyncError> {
        let released = self.store.compare_and_delete(key, owner)?;
        if !released {
            tracing::warn!(
                "lease {key} was no longer held by {owner} at release; exclusivity may have lapsed"
            );
        }
        Ok(released)
    }

    pub fn holder(&self, key: &str) -> Result<Option<OwnerToken>, SyncError> {
        self.store.holder(key)
    }

    /// Acquire with the configured retry budget.
    ///
    /// Returns [`SyncError::LockUnavailable`] once every attempt found the key held.
    pub fn lock(&self, key: &str, owner: &OwnerToken) -> Result<LeaseGuard, SyncError> {
        for attempt in 1..=self.retries {
            if self.acquire(key, owner, self.ttl)? {
                tracing::debug!("lease {key} acquired by {owner} (attempt {attempt})");
                return Ok(LeaseGuard {
                    lock: self.clone(),
                    lease: LockLease::new(key, owner.clone(), self.ttl),
                    released: false,
                });
            }
            if attempt < self.retries {
                thread::sleep(self.retry_delay);
            }
        }
        Err(SyncError::LockUnavailable {
            key: key.to_string(),
            attempts: self.retries,
        })
    }
}

/// A held lease. Released by compare-and-delete on drop.
#[derive(Debug)]
pub struct LeaseGuard {
    lock: DistributedLock,
    lease: LockLease,
    released: bool,
}

impl LeaseGuard {
    pub fn lease(&self) -> &LockLease {
        &self.lease
    }

    /// Whether the TTL ran out; the critical section is no longer exclusive.
    pub fn is_expired(&self) -> bool {
        self.lease.is_expired(Utc::now())
    }

    /// Release now and report whether the lease was still ours.
    pub fn release(mut self) -> Result<bool, SyncError> {
        self.released = true;
        self.lock.release(&self.lease.key, &self.lease.owner_token)
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.lock.release(&self.lease.key, &self.lease.owner_token) {
            tracing::warn!("failed to release lease {}: {e}", self.lease.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock(retries: u32) -> DistributedLock {
        DistributedLock::new(
            Arc::new(MemoryLeaseStore::new()),
            Duration::from_secs(30),
            retries,
            Duration::from_millis(5),
        )
    }

    #[test]
    fn second_owner_is_refused_until_release() {
        let lock = lock(1);
        let a = OwnerToken::from("a");
        let b = OwnerToken::from("b");
        assert!(lock.acquire("k", &a, lock.ttl()).unwrap());
        assert!(!lock.acquire("k", &b, lock.ttl()).unwrap());
        assert!(lock.release("k", &a).unwrap());
        assert!(lock.acquire("k", &b, lock.ttl()).unwrap());
    }

    #[test]
    fn release_with_wrong_token_keeps_lease() {
        let lock = lock(1);
        let a = OwnerToken::from("a");
        let b = OwnerToken::from("b");
        assert!(lock.acquire("k", &a, lock.ttl()).unwrap());
        assert!(!lock.release("k", &b).unwrap());
        assert_eq!(lock.holder("k").unwrap(), Some(a));
    }

    #[test]
    fn guard_releases_on_drop() {
        let lock = lock(2);
        let a = OwnerToken::from("a");
        {
            let guard = lock.lock("k", &a).unwrap();
            assert_eq!(guard.lease().owner_token, a);
            assert!(!guard.is_expired());
        }
        assert_eq!(lock.holder("k").unwrap(), None);
    }

    #[test]
    fn exhausted_retries_report_unavailable() {
        let lock = lock(3);
        let _held = lock.lock("k", &OwnerToken::from("a")).unwrap();
        let err = lock.lock("k", &OwnerToken::from("b")).unwrap_err();
        assert!(matches!(err, SyncError::LockUnavailable { attempts: 3, .. }));
    }

    #[test]
    fn file_backend_uses_configured_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let leases = dir.path().join("shared-leases");
        let config = DistributedLockConfig {
            backend: LockBackend::File,
            dir: Some(leases.clone()),
            ..DistributedLockConfig::default()
        };
        let store = open_store(&config, Path::new("/nonexistent")).unwrap();
        assert!(store
            .set_if_absent("k", &OwnerToken::from("a"), Duration::from_secs(5))
            .unwrap());
        assert!(leases.exists());
    }
}
