use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const MIN_ROUTE_PLACES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverId(pub u64);

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiderId(pub u64);

impl fmt::Display for RiderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bus topics carrying the events below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    DriverUpdates,
    RideRequests,
    RideCompletions,
    RiderDriverMatch,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::DriverUpdates,
        Topic::RideRequests,
        Topic::RideCompletions,
        Topic::RiderDriverMatch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DriverUpdates => "driver-updates",
            Self::RideRequests => "ride-requests",
            Self::RideCompletions => "trip-completed",
            Self::RiderDriverMatch => "rider-driver-match",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published by the route engine on every tick a driver still has seats.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverLocationEvent {
    pub message_id: String,
    pub driver_id: DriverId,
    /// Last station the driver passed; empty when none.
    #[serde(default)]
    pub old_station: String,
    /// Next station ahead on the route; empty when none remains.
    #[serde(default)]
    pub next_station: String,
    pub time_to_next_station_secs: u64,
    pub available_seats: u32,
    pub final_destination: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RideRequest {
    pub message_id: String,
    pub rider_id: RiderId,
    pub pickup_station: String,
    pub destination_place: String,
    /// Desired arrival at the pickup station, epoch milliseconds.
    pub arrival_time_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RideCompletionEvent {
    pub message_id: String,
    pub driver_id: DriverId,
    pub final_destination: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchResult {
    pub message_id: String,
    pub driver_id: DriverId,
    pub rider_id: RiderId,
    pub pickup_station: String,
    pub driver_arrival_time_ms: i64,
}

/// Synchronous registration input coming from the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverRegistration {
    pub driver_id: DriverId,
    pub route_places: Vec<String>,
    pub final_destination: String,
    pub available_seats: u32,
}

impl DriverRegistration {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.route_places.len() < MIN_ROUTE_PLACES {
            return Err(ValidationError::new(format!(
                "route must contain at least {MIN_ROUTE_PLACES} places, got {}",
                self.route_places.len()
            )));
        }
        if let Some(position) = self
            .route_places
            .iter()
            .position(|place| place.trim().is_empty())
        {
            return Err(ValidationError::new(format!(
                "route place at position {position} is empty"
            )));
        }
        if self.final_destination.trim().is_empty() {
            return Err(ValidationError::new("final_destination cannot be empty"));
        }
        if self.available_seats == 0 {
            return Err(ValidationError::new(
                "available_seats must be a positive integer",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Malformed payload on the way in, or an unencodable value on the way out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError {
    message: String,
}

impl CodecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CodecError {}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|error| CodecError::new(format!("encode failed: {error}")))
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(payload)
        .map_err(|error| CodecError::new(format!("decode failed: {error}")))
}

/// Deterministic message id for a match: redelivered requests reproduce the
/// same id so downstream consumers dedup the second emission.
pub fn match_message_id(driver_id: DriverId, rider_id: RiderId, request_id: &str) -> String {
    fingerprint(&[
        "match",
        &driver_id.to_string(),
        &rider_id.to_string(),
        request_id,
    ])
}

pub fn completion_message_id(
    driver_id: DriverId,
    final_destination: &str,
    registered_at_ms: i64,
) -> String {
    fingerprint(&[
        "completion",
        &driver_id.to_string(),
        final_destination,
        &registered_at_ms.to_string(),
    ])
}

fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        // Separator keeps ("ab", "c") and ("a", "bc") apart.
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
