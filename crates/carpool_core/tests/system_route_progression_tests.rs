mod support;

use carpool_contracts::contract::{DriverId, DriverLocationEvent, RideCompletionEvent, Topic};
use carpool_contracts::storage_keys::PLACE_GRAPH_KEY;
use carpool_core::bus::Disposition;
use carpool_core::store::save_json;
use carpool_core::test_helpers::{sample_reference_data, TestHarness};

use support::{index_driver, payload, registration, ride_request};

#[test]
fn two_ticks_reach_destination_exactly() {
    let harness = TestHarness::seeded(&sample_reference_data());
    let engine = harness.route_engine();
    engine
        .register_driver_route(registration(1, &["A", "B", "C"], "C", 3))
        .expect("valid registration");

    let first = engine.tick().expect("tick 1");
    assert_eq!(first.advanced, 1);
    let state = engine.driver_state(DriverId(1)).unwrap().unwrap();
    assert_eq!(state.next_place(), Some("B"));
    assert_eq!(state.distance_remaining, Some(5.0));

    let updates: Vec<DriverLocationEvent> = harness.bus.drain_decoded(Topic::DriverUpdates);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].old_station, "S-A");
    assert_eq!(updates[0].next_station, "S-C");
    // 5 left to B plus 5 to C at 10 units per 120 s.
    assert_eq!(updates[0].time_to_next_station_secs, 120);
    assert_eq!(updates[0].available_seats, 3);

    let second = engine.tick().expect("tick 2");
    assert_eq!(second.completed, 1);
    assert!(engine.driver_state(DriverId(1)).unwrap().is_none());
    assert!(harness.bus.is_empty(Topic::DriverUpdates));

    let completions: Vec<RideCompletionEvent> = harness.bus.drain_decoded(Topic::RideCompletions);
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].driver_id, DriverId(1));
    assert_eq!(completions[0].final_destination, "C");
}

#[test]
fn completion_is_emitted_once_over_many_ticks() {
    let harness = TestHarness::seeded(&sample_reference_data());
    let engine = harness.route_engine();
    engine
        .register_driver_route(registration(1, &["A", "B", "C", "D"], "D", 1))
        .unwrap();

    for _ in 0..20 {
        engine.tick().unwrap();
    }

    assert_eq!(harness.bus.len(Topic::RideCompletions), 1);
    assert_eq!(engine.driver_count().unwrap(), 0);
}

#[test]
fn total_advance_matches_distance_consumed() {
    let harness = TestHarness::seeded(&sample_reference_data());
    let engine = harness.route_engine();
    engine
        .register_driver_route(registration(1, &["A", "B", "C", "D"], "D", 1))
        .unwrap();
    let graph = sample_reference_data().graph;
    let route_length = engine
        .driver_state(DriverId(1))
        .unwrap()
        .unwrap()
        .remaining_route_length(&graph)
        .unwrap();
    assert_eq!(route_length, 50.0);

    for ticks in 1..=4u32 {
        engine.tick().unwrap();
        let left = engine
            .driver_state(DriverId(1))
            .unwrap()
            .unwrap()
            .remaining_route_length(&graph)
            .unwrap();
        let consumed = f64::from(ticks) * harness.config.route.distance_per_tick;
        assert_eq!(route_length - left, consumed.min(route_length));
    }

    engine.tick().unwrap();
    assert!(engine.driver_state(DriverId(1)).unwrap().is_none());
    assert_eq!(harness.bus.len(Topic::RideCompletions), 1);
}

#[test]
fn unknown_edge_pins_driver_until_learned() {
    let mut data = sample_reference_data();
    let harness = TestHarness::seeded(&data);
    let engine = harness.route_engine();
    engine
        .register_driver_route(registration(1, &["A", "B", "Q"], "Q", 2))
        .unwrap();

    engine.tick().unwrap();
    let report = engine.tick().unwrap();
    assert_eq!(report.pinned, 1);
    let pinned = engine.driver_state(DriverId(1)).unwrap().unwrap();
    assert!(pinned.is_pinned());
    assert_eq!(pinned.current_place(), Some("B"));

    let report = engine.tick().unwrap();
    assert_eq!(report.pinned, 1);
    assert_eq!(engine.driver_state(DriverId(1)).unwrap().unwrap(), pinned);

    data.graph.insert("B", "Q", 25.0);
    data.seed(harness.store.as_ref()).unwrap();
    let report = engine.tick().unwrap();
    assert_eq!(report.pinned, 0);
    let moving = engine.driver_state(DriverId(1)).unwrap().unwrap();
    assert_eq!(moving.distance_remaining, Some(15.0));
}

#[test]
fn driver_behind_unknown_edge_is_never_offered_to_riders() {
    let mut data = sample_reference_data();
    data.stations.insert("Q", "S-Q");
    let harness = TestHarness::seeded(&data);
    let routes = harness.route_engine();
    let matching = harness.matching_engine();
    routes
        .register_driver_route(registration(1, &["A", "B", "Q"], "Q", 2))
        .unwrap();
    // Left over from an earlier advertisement of the same station.
    index_driver(&matching, 1, "S-Q", "Q", 60);

    for _ in 0..2 {
        routes.tick().unwrap();
        for update in harness.bus.drain_decoded::<DriverLocationEvent>(Topic::DriverUpdates) {
            assert!(update.next_station.is_empty());
            assert_eq!(update.time_to_next_station_secs, 0);
            assert_eq!(
                matching.handle_driver_location(&payload(&update)),
                Disposition::Ack
            );
        }
    }
    assert!(routes.driver_state(DriverId(1)).unwrap().unwrap().is_pinned());
    assert!(matching.availability_index().unwrap().locate(DriverId(1)).is_none());

    let request = ride_request("req-q", 5, "S-Q", "Q", harness.now_ms());
    assert_eq!(matching.handle_ride_request(&payload(&request)), Disposition::Ack);
    assert!(harness.bus.is_empty(Topic::RiderDriverMatch));
    assert_eq!(matching.waiting_queue().unwrap().len(), 1);

    data.graph.insert("B", "Q", 25.0);
    data.seed(harness.store.as_ref()).unwrap();
    routes.tick().unwrap();
    let updates: Vec<DriverLocationEvent> = harness.bus.drain_decoded(Topic::DriverUpdates);
    assert_eq!(updates[0].next_station, "S-Q");
    // 15 units left on B-Q.
    assert_eq!(updates[0].time_to_next_station_secs, 180);
}

#[test]
fn route_ending_short_of_destination_completes() {
    let harness = TestHarness::seeded(&sample_reference_data());
    let engine = harness.route_engine();
    engine
        .register_driver_route(registration(1, &["A", "B"], "Z", 1))
        .unwrap();

    engine.tick().unwrap();
    engine.tick().unwrap();
    engine.tick().unwrap();

    assert_eq!(harness.bus.len(Topic::RideCompletions), 1);
    assert_eq!(engine.driver_count().unwrap(), 0);
}

#[test]
fn missing_station_map_still_advances() {
    let harness = TestHarness::new();
    save_json(
        harness.store.as_ref(),
        PLACE_GRAPH_KEY,
        &sample_reference_data().graph,
    )
    .unwrap();
    let engine = harness.route_engine();
    engine
        .register_driver_route(registration(1, &["A", "B", "C"], "C", 1))
        .unwrap();

    let report = engine.tick().unwrap();
    assert_eq!(report.advanced, 1);
    let updates: Vec<DriverLocationEvent> = harness.bus.drain_decoded(Topic::DriverUpdates);
    assert_eq!(updates.len(), 1);
    assert!(updates[0].old_station.is_empty());
    assert!(updates[0].next_station.is_empty());
    assert_eq!(updates[0].time_to_next_station_secs, 0);
}
