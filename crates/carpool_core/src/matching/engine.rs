use carpool_contracts::contract::{
    match_message_id, DriverLocationEvent, MatchResult, RideCompletionEvent, RideRequest, RiderId,
    Topic,
};
use carpool_contracts::storage_keys::LockKey;
use tracing::{debug, info, warn};

use crate::availability::DriverAvailabilityIndex;
use crate::bus::{publish_outbound, Disposition, Outbound};
use crate::config::DispatchConfig;
use crate::context::EngineContext;
use crate::error::EngineError;
use crate::handler::InboundPipeline;
use crate::idempotency::IdempotencyGuard;
use crate::lock::DistributedLock;
use crate::matching::search::{search, MatchThresholds, SearchQuery};
use crate::matching::waiting_queue::{WaitingQueue, WaitingQueueEntry};
use crate::reference::{load_destination_distances, DestinationDistanceTable};
use crate::store::StoreError;

/// Lock set for every path that may match a rider, in acquisition order.
const MATCH_LOCKS: [LockKey; 3] = [
    LockKey::AvailabilityIndex,
    LockKey::DestinationDistances,
    LockKey::WaitingQueue,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Queue was empty.
    Idle,
    Matched(MatchResult),
    /// Still unmatched, back at the tail.
    Requeued { rider_id: RiderId },
}

/// Pairs the waiting rider with the best driver and takes that driver out of
/// the index. Nothing is persisted here.
pub fn try_match(
    index: &mut DriverAvailabilityIndex,
    distances: &DestinationDistanceTable,
    entry: &WaitingQueueEntry,
    now_ms: i64,
    thresholds: MatchThresholds,
) -> Option<MatchResult> {
    let query = SearchQuery {
        pickup_station: &entry.pickup_station,
        destination_place: &entry.destination_place,
        desired_arrival_ms: entry.arrival_time_ms,
    };
    let candidate = search(index, distances, &query, now_ms, thresholds)?;
    index.remove(candidate.driver_id, &candidate.station, &candidate.destination);

    Some(MatchResult {
        message_id: match_message_id(candidate.driver_id, entry.rider_id, &entry.request_id),
        driver_id: candidate.driver_id,
        rider_id: entry.rider_id,
        pickup_station: candidate.station.clone(),
        driver_arrival_time_ms: candidate.arrival_ms(now_ms),
    })
}

pub struct MatchingEngine {
    ctx: EngineContext,
    lock: DistributedLock,
    dedup: IdempotencyGuard,
    thresholds: MatchThresholds,
    refresh_arrival_on_retry: bool,
}

impl MatchingEngine {
    pub fn new(ctx: EngineContext, config: &DispatchConfig) -> Self {
        Self {
            lock: DistributedLock::new(ctx.store.clone(), config.lock_policy()),
            dedup: IdempotencyGuard::new(ctx.store.clone(), config.idempotency.marker_ttl()),
            thresholds: config.matching.into(),
            refresh_arrival_on_retry: config.matching.refresh_arrival_on_retry,
            ctx,
        }
    }

    fn pipeline(&self) -> InboundPipeline<'_> {
        InboundPipeline {
            lock: &self.lock,
            dedup: &self.dedup,
            bus: self.ctx.bus.as_ref(),
        }
    }

    pub fn handle_driver_location(&self, payload: &[u8]) -> Disposition {
        self.pipeline().handle(
            payload,
            &[LockKey::AvailabilityIndex],
            |event: &DriverLocationEvent| {
                let store = self.ctx.store.as_ref();
                let mut index = DriverAvailabilityIndex::load(store)?;
                index.apply_location_update(event);
                index.save(store)?;
                debug!(
                    driver_id = %event.driver_id,
                    old_station = %event.old_station,
                    next_station = %event.next_station,
                    "availability updated"
                );
                Ok(Vec::new())
            },
        )
    }

    pub fn handle_ride_completion(&self, payload: &[u8]) -> Disposition {
        self.pipeline().handle(
            payload,
            &[LockKey::AvailabilityIndex],
            |event: &RideCompletionEvent| {
                let store = self.ctx.store.as_ref();
                let mut index = DriverAvailabilityIndex::load(store)?;
                let removed = index.remove_driver_everywhere(event.driver_id);
                if removed > 0 {
                    index.save(store)?;
                }
                info!(driver_id = %event.driver_id, removed, "completed driver dropped from index");
                Ok(Vec::new())
            },
        )
    }

    /// Matches the rider right away or parks them in the waiting queue.
    pub fn handle_ride_request(&self, payload: &[u8]) -> Disposition {
        self.pipeline()
            .handle(payload, &MATCH_LOCKS, |request: &RideRequest| {
                let store = self.ctx.store.as_ref();
                let now = self.ctx.now_ms();
                let desired = if request.arrival_time_ms <= 0 {
                    now
                } else {
                    request.arrival_time_ms
                };
                let entry = WaitingQueueEntry::from_request(request, desired);

                let mut index = DriverAvailabilityIndex::load(store)?;
                let distances = self.load_distances()?;
                match try_match(&mut index, &distances, &entry, now, self.thresholds) {
                    Some(result) => {
                        let outbound = self.match_outbound(&result)?;
                        index.save(store)?;
                        Ok(vec![outbound])
                    }
                    None => {
                        let mut queue = WaitingQueue::load(store)?;
                        queue.push_back(entry);
                        queue.save(store)?;
                        info!(
                            rider_id = %request.rider_id,
                            pickup_station = %request.pickup_station,
                            queued = queue.len(),
                            "no driver available, rider queued"
                        );
                        Ok(Vec::new())
                    }
                }
            })
    }

    /// Retries exactly one waiting rider.
    pub fn retry_waiting_tick(&self) -> Result<RetryOutcome, EngineError> {
        let held = self.lock.acquire_ordered(&MATCH_LOCKS)?;
        let store = self.ctx.store.as_ref();

        let mut queue = WaitingQueue::load(store)?;
        let Some(mut entry) = queue.pop_front() else {
            return Ok(RetryOutcome::Idle);
        };
        let now = self.ctx.now_ms();
        let mut index = DriverAvailabilityIndex::load(store)?;
        let distances = self.load_distances()?;

        match try_match(&mut index, &distances, &entry, now, self.thresholds) {
            Some(result) => {
                let outbound = self.match_outbound(&result)?;
                // Index first: if the queue write fails the rider is retried
                // and the driver comes back with its next location update.
                index.save(store)?;
                queue.save(store)?;
                held.release();
                publish_outbound(self.ctx.bus.as_ref(), outbound);
                Ok(RetryOutcome::Matched(result))
            }
            None => {
                if self.refresh_arrival_on_retry {
                    entry.arrival_time_ms = now;
                }
                let rider_id = entry.rider_id;
                queue.push_back(entry);
                queue.save(store)?;
                debug!(%rider_id, queued = queue.len(), "waiting rider still unmatched");
                Ok(RetryOutcome::Requeued { rider_id })
            }
        }
    }

    fn match_outbound(&self, result: &MatchResult) -> Result<Outbound, EngineError> {
        info!(
            driver_id = %result.driver_id,
            rider_id = %result.rider_id,
            pickup_station = %result.pickup_station,
            arrival_ms = result.driver_arrival_time_ms,
            "rider matched"
        );
        Ok(Outbound::event(
            Topic::RiderDriverMatch,
            result.rider_id.to_string(),
            result,
        )?)
    }

    fn load_distances(&self) -> Result<DestinationDistanceTable, StoreError> {
        Ok(match load_destination_distances(self.ctx.store.as_ref())? {
            Some(distances) => distances,
            None => {
                warn!("destination distance table missing, only exact destinations match");
                DestinationDistanceTable::new()
            }
        })
    }

    /// Unlocked snapshot of the availability index.
    pub fn availability_index(&self) -> Result<DriverAvailabilityIndex, StoreError> {
        DriverAvailabilityIndex::load(self.ctx.store.as_ref())
    }

    /// Unlocked snapshot of the waiting queue.
    pub fn waiting_queue(&self) -> Result<WaitingQueue, StoreError> {
        WaitingQueue::load(self.ctx.store.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::AvailabilityEntry;
    use carpool_contracts::contract::{encode, DriverId};

    fn entry(rider: u64, arrival_ms: i64) -> WaitingQueueEntry {
        WaitingQueueEntry {
            rider_id: RiderId(rider),
            pickup_station: "S".to_string(),
            destination_place: "X".to_string(),
            arrival_time_ms: arrival_ms,
            request_id: format!("req-{rider}"),
        }
    }

    #[test]
    fn try_match_removes_exactly_the_winner() {
        let mut index = DriverAvailabilityIndex::new();
        for (id, secs) in [(1, 30), (2, 90)] {
            index.upsert(
                "S",
                "X",
                AvailabilityEntry {
                    driver_id: DriverId(id),
                    time_to_station_ms: secs * 1000,
                    available_seats: 1,
                },
            );
        }

        let result = try_match(
            &mut index,
            &DestinationDistanceTable::new(),
            &entry(7, 0),
            0,
            MatchThresholds::default(),
        )
        .unwrap();
        assert_eq!(result.driver_id, DriverId(1));
        assert_eq!(result.driver_arrival_time_ms, 30_000);
        assert_eq!(result.message_id, match_message_id(DriverId(1), RiderId(7), "req-7"));
        assert_eq!(index.len(), 1);
        assert!(index.locate(DriverId(2)).is_some());
    }

    #[test]
    fn retry_on_empty_queue_is_idle() {
        let harness = crate::test_helpers::TestHarness::new();
        let engine = harness.matching_engine();
        assert_eq!(engine.retry_waiting_tick().unwrap(), RetryOutcome::Idle);
    }

    #[test]
    fn non_positive_arrival_means_now() {
        let harness = crate::test_helpers::TestHarness::new();
        let engine = harness.matching_engine();
        let request = RideRequest {
            message_id: "r-1".to_string(),
            rider_id: RiderId(3),
            pickup_station: "S".to_string(),
            destination_place: "X".to_string(),
            arrival_time_ms: 0,
        };
        assert_eq!(
            engine.handle_ride_request(&encode(&request).unwrap()),
            Disposition::Ack
        );
        let queue = engine.waiting_queue().unwrap();
        let queued = queue.iter().next().unwrap();
        assert_eq!(queued.arrival_time_ms, harness.now_ms());
        assert_eq!(queued.request_id, "r-1");
    }

    #[test]
    fn malformed_request_is_dropped() {
        let harness = crate::test_helpers::TestHarness::new();
        let engine = harness.matching_engine();
        assert_eq!(engine.handle_ride_request(b"not json"), Disposition::Ack);
        assert!(engine.waiting_queue().unwrap().is_empty());
    }
}
