use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use carpool_contracts::contract::{
    encode, DriverId, DriverLocationEvent, DriverRegistration, MatchResult, RideRequest, RiderId,
    Topic,
};
use carpool_core::bus::{BusMessage, Disposition, MessageSource};
use carpool_core::test_helpers::{sample_reference_data, test_config, TestHarness};
use carpool_service::consumer::drain_topic;
use carpool_service::scheduler::spawn_fixed_rate;
use carpool_service::service::DispatchService;
use tokio_util::sync::CancellationToken;

fn service_for(harness: &TestHarness) -> DispatchService {
    let source: Arc<dyn MessageSource> = harness.bus.clone();
    DispatchService::new(harness.context(), source, harness.config)
}

fn register_a_to_d(service: &DispatchService) {
    service
        .routes()
        .register_driver_route(DriverRegistration {
            driver_id: DriverId(1),
            route_places: ["A", "B", "C", "D"].iter().map(|p| p.to_string()).collect(),
            final_destination: "D".to_string(),
            available_seats: 2,
        })
        .unwrap();
}

fn push_request(harness: &TestHarness, message_id: &str, rider: u64, arrival_time_ms: i64) {
    let request = RideRequest {
        message_id: message_id.to_string(),
        rider_id: RiderId(rider),
        pickup_station: "S-C".to_string(),
        destination_place: "D".to_string(),
        arrival_time_ms,
    };
    harness.bus.push(
        Topic::RideRequests,
        BusMessage {
            key: rider.to_string(),
            payload: encode(&request).unwrap(),
        },
    );
}

fn drain(service: &DispatchService, harness: &TestHarness, topic: Topic) {
    let handler = |payload: &[u8]| service.dispatch(topic, payload);
    let stats = drain_topic(topic, harness.bus.as_ref(), &handler);
    assert_eq!(stats.redelivered, 0, "{topic} left messages for redelivery");
}

#[test]
fn tick_request_and_match_flow_through_the_bus() {
    let harness = TestHarness::seeded(&sample_reference_data());
    let service = service_for(&harness);
    register_a_to_d(&service);

    service.routes().tick().unwrap();
    assert_eq!(harness.bus.len(Topic::DriverUpdates), 1);
    drain(&service, &harness, Topic::DriverUpdates);

    let index = service.matching().availability_index().unwrap();
    let (station, destination, entry) = index.locate(DriverId(1)).unwrap();
    assert_eq!((station, destination), ("S-C", "D"));
    assert_eq!(entry.time_to_station_ms, 120_000);

    push_request(&harness, "req-1", 7, harness.now_ms() + 120_000);
    drain(&service, &harness, Topic::RideRequests);

    let matches: Vec<MatchResult> = harness.bus.drain_decoded(Topic::RiderDriverMatch);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].driver_id, DriverId(1));
    assert_eq!(matches[0].rider_id, RiderId(7));

    harness.bus.push(
        Topic::RiderDriverMatch,
        BusMessage {
            key: "7".to_string(),
            payload: encode(&matches[0]).unwrap(),
        },
    );
    drain(&service, &harness, Topic::RiderDriverMatch);

    let state = service.routes().driver_state(DriverId(1)).unwrap().unwrap();
    assert_eq!(state.available_seats, 1);
}

#[test]
fn dispatch_routes_each_topic_to_its_consumer() {
    let harness = TestHarness::seeded(&sample_reference_data());
    let service = service_for(&harness);

    let location = DriverLocationEvent {
        message_id: "loc-1".to_string(),
        driver_id: DriverId(4),
        old_station: String::new(),
        next_station: "S-A".to_string(),
        time_to_next_station_secs: 60,
        available_seats: 1,
        final_destination: "X".to_string(),
    };
    assert_eq!(
        service.dispatch(Topic::DriverUpdates, &encode(&location).unwrap()),
        Disposition::Ack
    );
    assert!(service
        .matching()
        .availability_index()
        .unwrap()
        .locate(DriverId(4))
        .is_some());

    // A match for an unknown driver is acknowledged without side effects.
    let unknown = MatchResult {
        message_id: "match-1".to_string(),
        driver_id: DriverId(99),
        rider_id: RiderId(1),
        pickup_station: "S-A".to_string(),
        driver_arrival_time_ms: harness.now_ms(),
    };
    assert_eq!(
        service.dispatch(Topic::RiderDriverMatch, &encode(&unknown).unwrap()),
        Disposition::Ack
    );
    assert_eq!(service.routes().driver_count().unwrap(), 0);

    assert_eq!(
        service.dispatch(Topic::RideRequests, b"not json"),
        Disposition::Ack
    );
}

#[test]
fn unreachable_store_leaves_message_at_head_of_topic() {
    let harness = TestHarness::seeded(&sample_reference_data());
    let service = service_for(&harness);
    push_request(&harness, "req-1", 7, harness.now_ms());
    push_request(&harness, "req-2", 8, harness.now_ms());

    harness.store.set_unavailable(true);
    let handler = |payload: &[u8]| service.dispatch(Topic::RideRequests, payload);
    let stats = drain_topic(Topic::RideRequests, harness.bus.as_ref(), &handler);
    assert_eq!(stats.acked, 0);
    assert_eq!(stats.redelivered, 1);
    assert_eq!(harness.bus.len(Topic::RideRequests), 2);

    harness.store.set_unavailable(false);
    drain(&service, &harness, Topic::RideRequests);
    let queue = service.matching().waiting_queue().unwrap();
    let riders: Vec<RiderId> = queue.iter().map(|entry| entry.rider_id).collect();
    assert_eq!(riders, vec![RiderId(7), RiderId(8)]);
}

#[tokio::test]
async fn fixed_rate_task_runs_until_cancelled() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let cancel = CancellationToken::new();
    let handle = spawn_fixed_rate("count", Duration::from_millis(5), cancel.clone(), move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    for _ in 0..200 {
        if runs.load(Ordering::SeqCst) >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();
    handle.await.unwrap();

    let after_cancel = runs.load(Ordering::SeqCst);
    assert!(after_cancel >= 3);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn started_service_matches_a_queued_rider() {
    let mut harness = TestHarness::seeded(&sample_reference_data());
    // One route tick for the whole test; consumers and retries run fast.
    harness.config.route.tick_period_ms = 60_000;
    harness.config.matching.retry_period_ms = 10;
    harness.config.bus.poll_interval_ms = 5;
    let service = service_for(&harness);
    register_a_to_d(&service);
    push_request(&harness, "req-1", 7, harness.now_ms() + 120_000);

    let cancel = CancellationToken::new();
    let handles = service.start(&cancel);

    let mut seats = None;
    for _ in 0..400 {
        seats = service
            .routes()
            .driver_state(DriverId(1))
            .unwrap()
            .map(|state| state.available_seats);
        if seats == Some(1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(seats, Some(1));
    assert!(service.matching().waiting_queue().unwrap().is_empty());
}

#[test]
fn in_memory_service_is_seeded_with_reference_data() {
    let (service, bus) =
        DispatchService::in_memory(test_config(), &sample_reference_data()).unwrap();
    register_a_to_d(&service);

    let report = service.routes().tick().unwrap();
    assert_eq!(report.advanced, 1);
    assert_eq!(bus.len(Topic::DriverUpdates), 1);
}
