use std::cmp::Ordering;
use std::collections::BinaryHeap;

use carpool_contracts::contract::DriverId;

use crate::availability::{AvailabilityEntry, DriverAvailabilityIndex};
use crate::config::MatchingConfig;
use crate::reference::DestinationDistanceTable;

/// Filters a driver must pass to be offered to a rider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchThresholds {
    /// Max distance between rider and driver destinations.
    pub distance: u32,
    /// Max gap between desired pickup time and driver arrival at the station.
    pub time_ms: i64,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        MatchingConfig::default().into()
    }
}

impl From<MatchingConfig> for MatchThresholds {
    fn from(config: MatchingConfig) -> Self {
        Self {
            distance: config.distance_threshold,
            time_ms: config.time_threshold_ms,
        }
    }
}

/// What the search is asked to pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchQuery<'a> {
    pub pickup_station: &'a str,
    pub destination_place: &'a str,
    pub desired_arrival_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub driver_id: DriverId,
    pub station: String,
    pub destination: String,
    pub time_to_station_ms: i64,
    pub available_seats: u32,
    pub destination_score: u32,
}

impl Candidate {
    pub fn arrival_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_add(self.time_to_station_ms)
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering to make BinaryHeap a min-heap by time to station.
        other
            .time_to_station_ms
            .cmp(&self.time_to_station_ms)
            .then_with(|| other.driver_id.cmp(&self.driver_id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 0 for the same place, else the table distance. `None` means unusable.
pub fn destination_score(
    distances: &DestinationDistanceTable,
    rider_destination: &str,
    driver_destination: &str,
) -> Option<u32> {
    if rider_destination == driver_destination {
        Some(0)
    } else {
        distances.get(rider_destination, driver_destination)
    }
}

/// Every driver at the pickup station within both thresholds, ordered so the
/// soonest arrival pops first.
pub fn candidate_pool(
    index: &DriverAvailabilityIndex,
    distances: &DestinationDistanceTable,
    query: &SearchQuery<'_>,
    now_ms: i64,
    thresholds: MatchThresholds,
) -> BinaryHeap<Candidate> {
    let mut pool = BinaryHeap::new();
    let Some(destinations) = index.station(query.pickup_station) else {
        return pool;
    };

    for (driver_destination, entries) in destinations {
        let Some(score) = destination_score(distances, query.destination_place, driver_destination)
        else {
            continue;
        };
        if score > thresholds.distance {
            continue;
        }
        pool.extend(
            entries
                .iter()
                .filter(|entry| within_time_window(entry, query.desired_arrival_ms, now_ms, thresholds))
                .map(|entry| Candidate {
                    driver_id: entry.driver_id,
                    station: query.pickup_station.to_string(),
                    destination: driver_destination.clone(),
                    time_to_station_ms: entry.time_to_station_ms,
                    available_seats: entry.available_seats,
                    destination_score: score,
                }),
        );
    }
    pool
}

fn within_time_window(
    entry: &AvailabilityEntry,
    desired_arrival_ms: i64,
    now_ms: i64,
    thresholds: MatchThresholds,
) -> bool {
    let arrival = now_ms.saturating_add(entry.time_to_station_ms);
    desired_arrival_ms.abs_diff(arrival) <= thresholds.time_ms.unsigned_abs()
}

/// Best candidate, if any. Read-only; the caller removes the winner.
pub fn search(
    index: &DriverAvailabilityIndex,
    distances: &DestinationDistanceTable,
    query: &SearchQuery<'_>,
    now_ms: i64,
    thresholds: MatchThresholds,
) -> Option<Candidate> {
    candidate_pool(index, distances, query, now_ms, thresholds).pop()
}
