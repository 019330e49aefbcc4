//! Station → destination → drivers index fed by location events.
//!
//! A driver lives in at most one (station, destination) bucket. Every insert
//! purges the driver from anywhere else first, and removals drop empty
//! buckets and empty stations so the persisted map never grows stale keys.

use std::collections::BTreeMap;

use carpool_contracts::contract::{DriverId, DriverLocationEvent};
use carpool_contracts::storage_keys::AVAILABILITY_INDEX_KEY;
use serde::{Deserialize, Serialize};

use crate::clock::ONE_SEC_MS;
use crate::store::{load_json, save_json, KeyValueStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityEntry {
    pub driver_id: DriverId,
    pub time_to_station_ms: i64,
    pub available_seats: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverAvailabilityIndex {
    stations: BTreeMap<String, BTreeMap<String, Vec<AvailabilityEntry>>>,
}

impl DriverAvailabilityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(store: &dyn KeyValueStore) -> Result<Self, StoreError> {
        Ok(load_json(store, AVAILABILITY_INDEX_KEY)?.unwrap_or_default())
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), StoreError> {
        save_json(store, AVAILABILITY_INDEX_KEY, self)
    }

    pub fn station(&self, station: &str) -> Option<&BTreeMap<String, Vec<AvailabilityEntry>>> {
        self.stations.get(station)
    }

    /// Removes the driver from one bucket. Returns whether an entry was removed.
    pub fn remove(&mut self, driver_id: DriverId, station: &str, destination: &str) -> bool {
        let Some(destinations) = self.stations.get_mut(station) else {
            return false;
        };
        let Some(entries) = destinations.get_mut(destination) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.driver_id != driver_id);
        let removed = entries.len() != before;

        if entries.is_empty() {
            destinations.remove(destination);
        }
        if destinations.is_empty() {
            self.stations.remove(station);
        }
        removed
    }

    pub fn remove_driver_everywhere(&mut self, driver_id: DriverId) -> usize {
        let mut removed = 0;
        self.stations.retain(|_, destinations| {
            destinations.retain(|_, entries| {
                let before = entries.len();
                entries.retain(|entry| entry.driver_id != driver_id);
                removed += before - entries.len();
                !entries.is_empty()
            });
            !destinations.is_empty()
        });
        removed
    }

    /// Inserts or replaces the driver's entry under (station, destination).
    pub fn upsert(&mut self, station: &str, destination: &str, entry: AvailabilityEntry) {
        self.remove_driver_everywhere(entry.driver_id);
        self.stations
            .entry(station.to_string())
            .or_default()
            .entry(destination.to_string())
            .or_default()
            .push(entry);
    }

    /// Moves the driver according to a location event. A driver with no
    /// reachable station ahead is dropped from every bucket.
    pub fn apply_location_update(&mut self, update: &DriverLocationEvent) {
        let destination = update.final_destination.as_str();
        if !update.old_station.is_empty() {
            self.remove(update.driver_id, &update.old_station, destination);
        }
        if update.next_station.is_empty() || destination.is_empty() {
            self.remove_driver_everywhere(update.driver_id);
            return;
        }
        let time_to_station_ms = i64::try_from(update.time_to_next_station_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(ONE_SEC_MS);
        self.upsert(
            &update.next_station,
            destination,
            AvailabilityEntry {
                driver_id: update.driver_id,
                time_to_station_ms,
                available_seats: update.available_seats,
            },
        );
    }

    /// Where a driver is indexed, if anywhere.
    pub fn locate(&self, driver_id: DriverId) -> Option<(&str, &str, &AvailabilityEntry)> {
        self.stations.iter().find_map(|(station, destinations)| {
            destinations.iter().find_map(|(destination, entries)| {
                entries
                    .iter()
                    .find(|entry| entry.driver_id == driver_id)
                    .map(|entry| (station.as_str(), destination.as_str(), entry))
            })
        })
    }

    pub fn len(&self) -> usize {
        self.stations
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }
}
