use std::collections::BTreeMap;

use carpool_contracts::contract::{DriverId, DriverRegistration};
use serde::{Deserialize, Serialize};

use crate::reference::PlaceGraph;

/// One driver's position along its registered route.
///
/// The driver sits on the edge `route[next_place_index - 1] -> route[next_place_index]`
/// with `distance_remaining` left to cover. `None` means the edge length is
/// unknown and the driver is pinned at the edge start until the graph learns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverRouteState {
    pub driver_id: DriverId,
    pub route: Vec<String>,
    pub next_place_index: usize,
    pub distance_remaining: Option<f64>,
    pub final_destination: String,
    pub available_seats: u32,
    #[serde(default)]
    pub last_passed_station: String,
    #[serde(default)]
    pub registered_at_ms: i64,
}

impl DriverRouteState {
    /// Expects a validated registration.
    pub fn from_registration(
        registration: DriverRegistration,
        graph: &PlaceGraph,
        registered_at_ms: i64,
    ) -> Self {
        let distance_remaining = graph.distance(
            &registration.route_places[0],
            &registration.route_places[1],
        );
        Self {
            driver_id: registration.driver_id,
            route: registration.route_places,
            next_place_index: 1,
            distance_remaining,
            final_destination: registration.final_destination,
            available_seats: registration.available_seats,
            last_passed_station: String::new(),
            registered_at_ms,
        }
    }

    pub fn next_place(&self) -> Option<&str> {
        self.route.get(self.next_place_index).map(String::as_str)
    }

    /// Place the current edge starts from.
    pub fn current_place(&self) -> Option<&str> {
        self.next_place_index
            .checked_sub(1)
            .and_then(|index| self.route.get(index))
            .map(String::as_str)
    }

    pub fn is_pinned(&self) -> bool {
        self.distance_remaining.is_none()
    }

    /// Whole route length still ahead, or `None` if any edge on it is unknown.
    pub fn remaining_route_length(&self, graph: &PlaceGraph) -> Option<f64> {
        let mut total = self.distance_remaining?;
        for pair in self.route[self.next_place_index..].windows(2) {
            total += graph.distance(&pair[0], &pair[1])?;
        }
        Some(total)
    }
}

/// All live drivers, persisted as one map under the route-states key.
pub type DriverRouteStates = BTreeMap<DriverId, DriverRouteState>;
