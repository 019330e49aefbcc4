//! Shared key-value store abstraction.
//!
//! The store is the synchronization point between service instances. Every
//! primitive here is atomic on its own; read-modify-write sequences must be
//! wrapped in a [`crate::lock::DistributedLock`].
//!
//! [`InMemoryStore`] backs tests and single-process deployments. TTLs are
//! evaluated lazily against the injected [`Clock`], so tests can expire leases
//! and dedup markers by advancing a [`crate::clock::ManualClock`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::clock::Clock;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("value under `{key}` is corrupt: {message}")]
    Corrupt { key: String, message: String },
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Atomic set-if-absent with expiry. Returns `true` when the value was written.
    fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool, StoreError>;

    /// Atomic check-and-delete. Returns `true` only if the stored value equaled `expected`.
    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// Read a JSON-encoded value. A missing key is `Ok(None)`.
pub fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|error| StoreError::Corrupt {
            key: key.to_string(),
            message: error.to_string(),
        })
}

pub fn save_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|error| StoreError::Corrupt {
        key: key.to_string(),
        message: error.to_string(),
    })?;
    store.set(key, raw)
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at_ms: Option<i64>,
}

impl StoredValue {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map_or(true, |expires| now_ms < expires)
    }
}

pub struct InMemoryStore {
    entries: Mutex<HashMap<String, StoredValue>>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an unreachable store: every call fails until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Sorted live keys, mostly for tests.
    pub fn live_keys(&self) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now_ms();
        let entries = self.entries()?;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, stored)| stored.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, StoredValue>>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store marked unreachable".to_string()));
        }
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("store mutex poisoned".to_string()))
    }

    fn expiry(&self, ttl: Duration) -> i64 {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.clock.now_ms().saturating_add(ttl_ms)
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("unavailable", &self.unavailable.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_ms();
        let mut entries = self.entries()?;
        match entries.get(key) {
            Some(stored) if stored.is_live(now) => Ok(Some(stored.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries()?.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at_ms: None,
            },
        );
        Ok(())
    }

    fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let expires_at_ms = Some(self.expiry(ttl));
        self.entries()?.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at_ms,
            },
        );
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        let expires_at_ms = Some(self.expiry(ttl));
        let mut entries = self.entries()?;
        if entries.get(key).is_some_and(|stored| stored.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at_ms,
            },
        );
        Ok(true)
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        let mut entries = self.entries()?;
        let matches = entries
            .get(key)
            .is_some_and(|stored| stored.is_live(now) && stored.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        Ok(self
            .entries()?
            .remove(key)
            .is_some_and(|stored| stored.is_live(now)))
    }
}
