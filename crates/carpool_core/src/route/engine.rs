use carpool_contracts::contract::{
    completion_message_id, DriverId, DriverLocationEvent, DriverRegistration, MatchResult,
    RideCompletionEvent, Topic,
};
use carpool_contracts::storage_keys::{LockKey, DRIVER_ROUTE_STATES_KEY, PLACE_GRAPH_KEY};
use tracing::{debug, error, info, warn};

use crate::bus::{new_message_id, publish_outbound, Disposition, Outbound};
use crate::config::DispatchConfig;
use crate::context::EngineContext;
use crate::error::EngineError;
use crate::handler::InboundPipeline;
use crate::idempotency::IdempotencyGuard;
use crate::lock::DistributedLock;
use crate::reference::{load_place_graph, load_station_map, PlaceGraph, StationProximityMap};
use crate::route::progression::{advance, station_update, Advance, ProgressionParams};
use crate::route::state::{DriverRouteState, DriverRouteStates};
use crate::store::{load_json, save_json, StoreError};

/// Counters for one tick across all drivers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub advanced: usize,
    pub pinned: usize,
    /// Advanced but not broadcast because no seats are left.
    pub silent: usize,
    pub completed: usize,
    pub failed: usize,
}

enum DriverStep {
    Moving {
        pinned: bool,
        event: Option<Outbound>,
    },
    Completed(Outbound),
}

/// Owns every driver's route state: registration, the periodic tick and
/// seat bookkeeping on matches.
pub struct RouteProgressionEngine {
    ctx: EngineContext,
    lock: DistributedLock,
    dedup: IdempotencyGuard,
    params: ProgressionParams,
}

impl RouteProgressionEngine {
    pub fn new(ctx: EngineContext, config: &DispatchConfig) -> Self {
        Self {
            lock: DistributedLock::new(ctx.store.clone(), config.lock_policy()),
            dedup: IdempotencyGuard::new(ctx.store.clone(), config.idempotency.marker_ttl()),
            params: config.route.into(),
            ctx,
        }
    }

    pub fn register_driver_route(&self, registration: DriverRegistration) -> Result<(), EngineError> {
        registration.validate()?;
        let _guard = self.lock.acquire_with_retry(LockKey::DriverRoutes)?;

        let graph = match load_place_graph(self.ctx.store.as_ref())? {
            Some(graph) => graph,
            None => {
                warn!("place graph missing at registration, first edge left unresolved");
                PlaceGraph::new()
            }
        };
        let driver_id = registration.driver_id;
        let state = DriverRouteState::from_registration(registration, &graph, self.ctx.now_ms());
        if state.is_pinned() {
            warn!(%driver_id, "first route edge unknown, driver pinned at start");
        }

        let mut states = self.load_states()?;
        if states.insert(driver_id, state).is_some() {
            info!(%driver_id, "driver re-registered, previous route replaced");
        } else {
            info!(%driver_id, "driver route registered");
        }
        self.save_states(&states)?;
        Ok(())
    }

    /// Success flag for collaborators that only need a yes/no answer.
    pub fn register_driver_route_ok(&self, registration: DriverRegistration) -> bool {
        let driver_id = registration.driver_id;
        match self.register_driver_route(registration) {
            Ok(()) => true,
            Err(error) => {
                warn!(%driver_id, %error, "driver registration rejected");
                false
            }
        }
    }

    pub fn tick(&self) -> Result<TickReport, EngineError> {
        let guard = self.lock.acquire_with_retry(LockKey::DriverRoutes)?;
        let store = self.ctx.store.as_ref();

        let graph =
            load_place_graph(store)?.ok_or(EngineError::MissingReferenceData(PLACE_GRAPH_KEY))?;
        let stations = match load_station_map(store)? {
            Some(stations) => stations,
            None => {
                warn!("nearby-stations map missing, drivers will report no stations");
                StationProximityMap::new()
            }
        };

        let mut states = self.load_states()?;
        let mut report = TickReport::default();
        let mut outbound = Vec::new();
        let driver_ids: Vec<DriverId> = states.keys().copied().collect();

        for driver_id in driver_ids {
            let Some(state) = states.get_mut(&driver_id) else {
                continue;
            };
            let snapshot = state.clone();
            match self.step_driver(state, &graph, &stations) {
                Ok(DriverStep::Moving { pinned, event }) => {
                    report.advanced += 1;
                    if pinned {
                        report.pinned += 1;
                    }
                    match event {
                        Some(event) => outbound.push(event),
                        None => report.silent += 1,
                    }
                }
                Ok(DriverStep::Completed(event)) => {
                    states.remove(&driver_id);
                    outbound.push(event);
                    report.completed += 1;
                    info!(%driver_id, "driver reached destination, route evicted");
                }
                Err(error) => {
                    *state = snapshot;
                    report.failed += 1;
                    error!(%driver_id, %error, "driver tick failed, state left unchanged");
                }
            }
        }

        self.save_states(&states)?;
        guard.release();

        for event in outbound {
            publish_outbound(self.ctx.bus.as_ref(), event);
        }
        debug!(?report, "route tick finished");
        Ok(report)
    }

    fn step_driver(
        &self,
        state: &mut DriverRouteState,
        graph: &PlaceGraph,
        stations: &StationProximityMap,
    ) -> Result<DriverStep, EngineError> {
        if state.next_place_index == 0 || state.next_place_index >= state.route.len() {
            return Err(EngineError::CorruptRouteState {
                driver_id: state.driver_id,
                message: format!(
                    "next place index {} outside route of {} places",
                    state.next_place_index,
                    state.route.len()
                ),
            });
        }

        let outcome = advance(state, graph, self.params.distance_per_tick);
        match &outcome {
            Advance::RouteExhausted { place } => warn!(
                driver_id = %state.driver_id,
                last_place = %place,
                destination = %state.final_destination,
                "route ended before the destination, treating as arrival"
            ),
            Advance::Pinned { from, to } => warn!(
                driver_id = %state.driver_id,
                %from,
                %to,
                "edge distance unknown, driver held in place"
            ),
            Advance::Arrived { .. } | Advance::EnRoute => {}
        }
        if outcome.is_terminal() {
            return self.completion(state).map(DriverStep::Completed);
        }

        let stations_view = station_update(state, graph, stations, &self.params);
        if let Some(passed) = stations_view.passed_station {
            state.last_passed_station = passed;
        }

        if state.available_seats == 0 {
            return Ok(DriverStep::Moving {
                pinned: state.is_pinned(),
                event: None,
            });
        }

        let event = DriverLocationEvent {
            message_id: new_message_id(),
            driver_id: state.driver_id,
            old_station: state.last_passed_station.clone(),
            next_station: stations_view.next_station,
            time_to_next_station_secs: stations_view.time_to_next_station_secs,
            available_seats: state.available_seats,
            final_destination: state.final_destination.clone(),
        };
        Ok(DriverStep::Moving {
            pinned: state.is_pinned(),
            event: Some(Outbound::event(
                Topic::DriverUpdates,
                state.driver_id.to_string(),
                &event,
            )?),
        })
    }

    fn completion(&self, state: &DriverRouteState) -> Result<Outbound, EngineError> {
        let event = RideCompletionEvent {
            message_id: completion_message_id(
                state.driver_id,
                &state.final_destination,
                state.registered_at_ms,
            ),
            driver_id: state.driver_id,
            final_destination: state.final_destination.clone(),
        };
        Ok(Outbound::event(
            Topic::RideCompletions,
            state.driver_id.to_string(),
            &event,
        )?)
    }

    /// Takes one seat from the driver, floored at zero. Unknown drivers are
    /// logged and yield `None`.
    pub fn decrement_seat_on_match(&self, driver_id: DriverId) -> Result<Option<u32>, EngineError> {
        let _guard = self.lock.acquire_with_retry(LockKey::DriverRoutes)?;
        self.decrement_seat_locked(driver_id)
    }

    fn decrement_seat_locked(&self, driver_id: DriverId) -> Result<Option<u32>, EngineError> {
        let mut states = self.load_states()?;
        let Some(state) = states.get_mut(&driver_id) else {
            warn!(%driver_id, "seat decrement for unknown driver ignored");
            return Ok(None);
        };
        state.available_seats = state.available_seats.saturating_sub(1);
        let seats = state.available_seats;
        self.save_states(&states)?;
        info!(%driver_id, seats, "seat taken");
        Ok(Some(seats))
    }

    /// Consumer of match events: one seat per distinct match.
    pub fn handle_match_result(&self, payload: &[u8]) -> Disposition {
        let pipeline = InboundPipeline {
            lock: &self.lock,
            dedup: &self.dedup,
            bus: self.ctx.bus.as_ref(),
        };
        pipeline.handle(payload, &[LockKey::DriverRoutes], |event: &MatchResult| {
            self.decrement_seat_locked(event.driver_id)?;
            Ok(Vec::new())
        })
    }

    /// Unlocked read of one driver's state.
    pub fn driver_state(&self, driver_id: DriverId) -> Result<Option<DriverRouteState>, StoreError> {
        Ok(self.load_states()?.remove(&driver_id))
    }

    pub fn driver_count(&self) -> Result<usize, StoreError> {
        Ok(self.load_states()?.len())
    }

    fn load_states(&self) -> Result<DriverRouteStates, StoreError> {
        Ok(load_json(self.ctx.store.as_ref(), DRIVER_ROUTE_STATES_KEY)?.unwrap_or_default())
    }

    fn save_states(&self, states: &DriverRouteStates) -> Result<(), StoreError> {
        save_json(self.ctx.store.as_ref(), DRIVER_ROUTE_STATES_KEY, states)
    }
}
