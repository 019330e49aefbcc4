//! Named mutual exclusion over the shared store.
//!
//! A lock is a store key holding a random token, written with set-if-absent
//! and a lease. Release deletes the key only if it still holds our token, so
//! an expired lease taken over by another instance is never released by us.
//!
//! Paths that need several locks go through [`DistributedLock::acquire_ordered`]
//! with keys in [`LockKey`] order; that fixed order is what prevents deadlock
//! between instances.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use carpool_contracts::storage_keys::LockKey;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::store::{KeyValueStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub lease: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            lease: Duration::from_millis(5000),
            max_attempts: 10,
            backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub key: String,
    pub token: String,
}

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KeyValueStore>,
    policy: LockPolicy,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KeyValueStore>, policy: LockPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> LockPolicy {
        self.policy
    }

    /// Single attempt. `Ok(None)` means someone else holds the lease.
    pub fn acquire(&self, key: &str, lease: Duration) -> Result<Option<LockHandle>, StoreError> {
        let token = format!("{:032x}", rand::random::<u128>());
        if self.store.set_if_absent(key, token.clone(), lease)? {
            Ok(Some(LockHandle {
                key: key.to_string(),
                token,
            }))
        } else {
            Ok(None)
        }
    }

    /// `Ok(false)` when the lease already expired or changed hands.
    pub fn release(&self, handle: &LockHandle) -> Result<bool, StoreError> {
        self.store.compare_and_delete(&handle.key, &handle.token)
    }

    pub fn acquire_with_retry(&self, key: LockKey) -> Result<LockGuard, EngineError> {
        let name = key.as_str();
        let attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.acquire(name, self.policy.lease) {
                Ok(Some(handle)) => {
                    debug!(lock = name, attempt, "lock acquired");
                    return Ok(LockGuard {
                        lock: self.clone(),
                        handle: Some(handle),
                    });
                }
                Ok(None) => warn!(lock = name, attempt, attempts, "lock busy, backing off"),
                Err(error) => warn!(lock = name, attempt, attempts, %error, "lock attempt failed"),
            }
            if attempt < attempts && !self.policy.backoff.is_zero() {
                thread::sleep(self.policy.backoff);
            }
        }
        Err(EngineError::LockUnavailable {
            key: name,
            attempts,
        })
    }

    /// Acquire every key in order. On failure the locks already taken are
    /// released in reverse before the error is returned.
    pub fn acquire_ordered(&self, keys: &[LockKey]) -> Result<LockSet, EngineError> {
        debug_assert!(
            keys.windows(2).all(|pair| pair[0] < pair[1]),
            "lock keys must be strictly ascending: {keys:?}"
        );
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            match self.acquire_with_retry(*key) {
                Ok(guard) => guards.push(guard),
                Err(error) => {
                    drop(LockSet { guards });
                    return Err(error);
                }
            }
        }
        Ok(LockSet { guards })
    }
}

/// Holds one lease; releases it on drop.
pub struct LockGuard {
    lock: DistributedLock,
    handle: Option<LockHandle>,
}

impl LockGuard {
    pub fn key(&self) -> Option<&str> {
        self.handle.as_ref().map(|handle| handle.key.as_str())
    }

    /// Release now instead of at scope end.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match self.lock.release(&handle) {
            Ok(true) => debug!(lock = %handle.key, "lock released"),
            Ok(false) => warn!(lock = %handle.key, "lease expired before release"),
            Err(error) => warn!(lock = %handle.key, %error, "lock release failed"),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Several leases taken in order; released last-acquired first.
pub struct LockSet {
    guards: Vec<LockGuard>,
}

impl LockSet {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Release now instead of at scope end.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}
