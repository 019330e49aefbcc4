use std::collections::VecDeque;

use carpool_contracts::contract::{RideRequest, RiderId};
use carpool_contracts::storage_keys::WAITING_QUEUE_KEY;
use serde::{Deserialize, Serialize};

use crate::store::{load_json, save_json, KeyValueStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingQueueEntry {
    pub rider_id: RiderId,
    pub pickup_station: String,
    pub destination_place: String,
    pub arrival_time_ms: i64,
    /// Message id of the request that created the entry; keeps match ids stable.
    #[serde(default)]
    pub request_id: String,
}

impl WaitingQueueEntry {
    pub fn from_request(request: &RideRequest, arrival_time_ms: i64) -> Self {
        Self {
            rider_id: request.rider_id,
            pickup_station: request.pickup_station.clone(),
            destination_place: request.destination_place.clone(),
            arrival_time_ms,
            request_id: request.message_id.clone(),
        }
    }
}

/// FIFO of riders nobody could take yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaitingQueue {
    entries: VecDeque<WaitingQueueEntry>,
}

impl WaitingQueue {
    pub fn load(store: &dyn KeyValueStore) -> Result<Self, StoreError> {
        Ok(load_json(store, WAITING_QUEUE_KEY)?.unwrap_or_default())
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), StoreError> {
        save_json(store, WAITING_QUEUE_KEY, self)
    }

    pub fn push_back(&mut self, entry: WaitingQueueEntry) {
        self.entries.push_back(entry);
    }

    pub fn pop_front(&mut self) -> Option<WaitingQueueEntry> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WaitingQueueEntry> {
        self.entries.iter()
    }

    pub fn contains_rider(&self, rider_id: RiderId) -> bool {
        self.entries.iter().any(|entry| entry.rider_id == rider_id)
    }
}
