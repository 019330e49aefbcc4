#![allow(dead_code)]

use carpool_contracts::contract::{
    encode, DriverId, DriverLocationEvent, DriverRegistration, RideRequest, RiderId,
};
use carpool_core::bus::Disposition;
use carpool_core::matching::MatchingEngine;

pub fn registration(id: u64, route: &[&str], destination: &str, seats: u32) -> DriverRegistration {
    DriverRegistration {
        driver_id: DriverId(id),
        route_places: route.iter().map(|place| place.to_string()).collect(),
        final_destination: destination.to_string(),
        available_seats: seats,
    }
}

pub fn ride_request(
    message_id: &str,
    rider: u64,
    station: &str,
    destination: &str,
    arrival_time_ms: i64,
) -> RideRequest {
    RideRequest {
        message_id: message_id.to_string(),
        rider_id: RiderId(rider),
        pickup_station: station.to_string(),
        destination_place: destination.to_string(),
        arrival_time_ms,
    }
}

pub fn location_event(
    message_id: &str,
    driver: u64,
    old_station: &str,
    next_station: &str,
    secs_to_station: u64,
    destination: &str,
) -> DriverLocationEvent {
    DriverLocationEvent {
        message_id: message_id.to_string(),
        driver_id: DriverId(driver),
        old_station: old_station.to_string(),
        next_station: next_station.to_string(),
        time_to_next_station_secs: secs_to_station,
        available_seats: 2,
        final_destination: destination.to_string(),
    }
}

pub fn payload<T: serde::Serialize>(event: &T) -> Vec<u8> {
    encode(event).expect("test events encode")
}

/// Index a driver at `station` heading to `destination` through the real handler.
pub fn index_driver(
    engine: &MatchingEngine,
    driver: u64,
    station: &str,
    destination: &str,
    secs_to_station: u64,
) {
    let event = location_event(
        &format!("seed-{driver}-{station}"),
        driver,
        "",
        station,
        secs_to_station,
        destination,
    );
    assert_eq!(engine.handle_driver_location(&payload(&event)), Disposition::Ack);
}
