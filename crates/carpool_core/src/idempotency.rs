use std::sync::Arc;
use std::time::Duration;

use carpool_contracts::storage_keys::{dedup_key, DedupNamespace};

use crate::store::{KeyValueStore, StoreError};

pub const DEFAULT_MARKER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Dedup markers for at-least-once consumers.
///
/// Messages without an id cannot be deduplicated and always pass through.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn already_processed(
        &self,
        namespace: DedupNamespace,
        message_id: &str,
    ) -> Result<bool, StoreError> {
        if message_id.trim().is_empty() {
            return Ok(false);
        }
        self.store.exists(&dedup_key(namespace, message_id))
    }

    pub fn mark_processed(
        &self,
        namespace: DedupNamespace,
        message_id: &str,
    ) -> Result<(), StoreError> {
        if message_id.trim().is_empty() {
            return Ok(());
        }
        self.store
            .set_with_ttl(&dedup_key(namespace, message_id), "1".to_string(), self.ttl)
    }
}
