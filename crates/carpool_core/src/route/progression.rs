//! Pure per-driver movement for one tick.
//!
//! Nothing here touches the store or the bus: [`advance`] mutates a single
//! [`DriverRouteState`] and reports what happened, and [`station_update`]
//! derives the station fields of the location event from the new position.

use tracing::warn;

use crate::config::RouteConfig;
use crate::reference::{PlaceGraph, StationProximityMap};
use crate::route::state::DriverRouteState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressionParams {
    pub distance_per_tick: f64,
    pub seconds_per_tick: u64,
}

impl Default for ProgressionParams {
    fn default() -> Self {
        RouteConfig::default().into()
    }
}

impl From<RouteConfig> for ProgressionParams {
    fn from(config: RouteConfig) -> Self {
        Self {
            distance_per_tick: config.distance_per_tick,
            seconds_per_tick: config.seconds_per_tick,
        }
    }
}

impl ProgressionParams {
    /// `ceil(distance / per_tick * secs_per_tick)`; non-positive distances take no time.
    pub fn duration_secs(&self, distance: f64) -> u64 {
        if !distance.is_finite() || distance <= 0.0 || self.distance_per_tick <= 0.0 {
            return 0;
        }
        (distance / self.distance_per_tick * self.seconds_per_tick as f64).ceil() as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// Still travelling; the state holds the new position.
    EnRoute,
    /// Stuck at `from` because the edge to `to` is unknown.
    Pinned { from: String, to: String },
    /// Reached the final destination.
    Arrived { place: String },
    /// Ran off the last route place without meeting the destination.
    RouteExhausted { place: String },
}

impl Advance {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Arrived { .. } | Self::RouteExhausted { .. })
    }
}

pub fn advance(state: &mut DriverRouteState, graph: &PlaceGraph, step: f64) -> Advance {
    let remaining = match state.distance_remaining {
        Some(remaining) => remaining,
        None => match pinned_edge(state, graph) {
            Ok(edge) => {
                state.distance_remaining = Some(edge);
                edge
            }
            Err(pinned) => return pinned,
        },
    };

    let after = remaining - step;
    if after > 0.0 {
        state.distance_remaining = Some(after);
        return Advance::EnRoute;
    }

    let mut remainder = -after;
    loop {
        let reached = state.route[state.next_place_index].clone();
        state.distance_remaining = Some(0.0);
        if reached == state.final_destination {
            return Advance::Arrived { place: reached };
        }

        let following = state.next_place_index + 1;
        let Some(next) = state.route.get(following).cloned() else {
            return Advance::RouteExhausted { place: reached };
        };
        state.next_place_index = following;

        let Some(edge) = graph.distance(&reached, &next) else {
            state.distance_remaining = None;
            return Advance::Pinned {
                from: reached,
                to: next,
            };
        };
        if remainder < edge {
            state.distance_remaining = Some(edge - remainder);
            return Advance::EnRoute;
        }
        remainder -= edge;
    }
}

fn pinned_edge(state: &DriverRouteState, graph: &PlaceGraph) -> Result<f64, Advance> {
    let from = state.current_place().unwrap_or_default();
    let to = state.next_place().unwrap_or_default();
    graph.distance(from, to).ok_or_else(|| Advance::Pinned {
        from: from.to_string(),
        to: to.to_string(),
    })
}

/// Station fields for the location event after a move.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StationUpdate {
    /// Nearest station behind the driver, if any.
    pub passed_station: Option<String>,
    /// First station ahead; empty when none remains.
    pub next_station: String,
    pub time_to_next_station_secs: u64,
}

pub fn station_update(
    state: &DriverRouteState,
    graph: &PlaceGraph,
    stations: &StationProximityMap,
    params: &ProgressionParams,
) -> StationUpdate {
    let passed_station = state.route[..state.next_place_index.min(state.route.len())]
        .iter()
        .rev()
        .find_map(|place| stations.station_for(place))
        .map(str::to_string);

    let ahead = state
        .route
        .iter()
        .enumerate()
        .skip(state.next_place_index)
        .find_map(|(index, place)| stations.station_for(place).map(|station| (index, station)));

    // A station behind an unknown edge is unreachable, so none is advertised.
    let reachable = ahead.and_then(|(station_index, station)| {
        distance_to_place(state, graph, station_index).map(|distance| (station, distance))
    });
    let Some((station, distance)) = reachable else {
        return StationUpdate {
            passed_station,
            ..StationUpdate::default()
        };
    };

    StationUpdate {
        passed_station,
        next_station: station.to_string(),
        time_to_next_station_secs: params.duration_secs(distance),
    }
}

/// Remaining edge plus every segment up to `target`. `None` while pinned or
/// on any unknown segment.
fn distance_to_place(state: &DriverRouteState, graph: &PlaceGraph, target: usize) -> Option<f64> {
    let mut total = state.distance_remaining?;
    for index in state.next_place_index..target {
        match graph.distance(&state.route[index], &state.route[index + 1]) {
            Some(segment) => total += segment,
            None => {
                warn!(
                    driver_id = %state.driver_id,
                    from = %state.route[index],
                    to = %state.route[index + 1],
                    "unknown segment on the way to next station"
                );
                return None;
            }
        }
    }
    Some(total)
}
