pub const DRIVER_ROUTE_STATES_KEY: &str = "driver-route-states";
pub const AVAILABILITY_INDEX_KEY: &str = "availability-index";
pub const WAITING_QUEUE_KEY: &str = "rider-waiting-queue";
pub const DESTINATION_DISTANCES_KEY: &str = "destination-distances";
pub const PLACE_GRAPH_KEY: &str = "place-graph";
pub const NEARBY_STATIONS_KEY: &str = "nearby-stations";

/// Named locks guarding the shared keys above.
///
/// Multi-lock paths must acquire in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    DriverRoutes,
    AvailabilityIndex,
    DestinationDistances,
    WaitingQueue,
}

impl LockKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DriverRoutes => "lock:driver-routes",
            Self::AvailabilityIndex => "lock:availability-index",
            Self::DestinationDistances => "lock:destination-distances",
            Self::WaitingQueue => "lock:waiting-queue",
        }
    }
}

/// Consumer namespaces for dedup markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DedupNamespace {
    DriverUpdate,
    RideRequest,
    RideCompletion,
    MatchResult,
}

impl DedupNamespace {
    fn as_str(self) -> &'static str {
        match self {
            Self::DriverUpdate => "driver-update",
            Self::RideRequest => "ride-request",
            Self::RideCompletion => "ride-completion",
            Self::MatchResult => "match-result",
        }
    }
}

pub fn dedup_key(namespace: DedupNamespace, message_id: &str) -> String {
    format!("dedup:{}:{}", namespace.as_str(), message_id.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_dedup_key_per_namespace() {
        assert_eq!(
            dedup_key(DedupNamespace::DriverUpdate, "abc-1"),
            "dedup:driver-update:abc-1"
        );
        assert_eq!(
            dedup_key(DedupNamespace::MatchResult, " abc-1 "),
            "dedup:match-result:abc-1"
        );
    }

    #[test]
    fn lock_keys_sort_in_acquisition_order() {
        let mut keys = vec![
            LockKey::WaitingQueue,
            LockKey::DestinationDistances,
            LockKey::AvailabilityIndex,
            LockKey::DriverRoutes,
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                LockKey::DriverRoutes,
                LockKey::AvailabilityIndex,
                LockKey::DestinationDistances,
                LockKey::WaitingQueue,
            ]
        );
        assert_eq!(LockKey::WaitingQueue.as_str(), "lock:waiting-queue");
    }
}
