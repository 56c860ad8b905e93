//! In-process lease store. No cross-process exclusion.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use texsync_core::OwnerToken;

use super::LeaseStore;
use crate::error::SyncError;

#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    leases: Mutex<HashMap<String, (OwnerToken, Instant)>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live leases only; expired entries are dropped on access.
    fn live(&self) -> MutexGuard<'_, HashMap<String, (OwnerToken, Instant)>> {
        let mut leases = self.leases.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        leases.retain(|_, (_, expires)| *expires > now);
        leases
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn set_if_absent(
        &self,
        key: &str,
        owner: &OwnerToken,
        ttl: Duration,
    ) -> Result<bool, SyncError> {
        let mut leases = self.live();
        if leases.contains_key(key) {
            return Ok(false);
        }
        leases.insert(key.to_string(), (owner.clone(), Instant::now() + ttl));
        Ok(true)
    }

    fn compare_and_delete(&self, key: &str, owner: &OwnerToken) -> Result<bool, SyncError> {
        let mut leases = self.live();
        match leases.get(key) {
            Some((held, _)) if held == owner => {
                leases.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn holder(&self, key: &str) -> Result<Option<OwnerToken>, SyncError> {
        Ok(self.live().get(key).map(|(owner, _)| owner.clone()))
    }
}
