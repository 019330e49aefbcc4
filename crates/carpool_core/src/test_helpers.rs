//! Test helpers shared by unit tests, integration tests and benches.
//!
//! Everything runs against [`InMemoryStore`], [`InMemoryBus`] and a
//! [`ManualClock`] with a lock policy that never sleeps.

use std::sync::Arc;
use std::time::Duration;

use crate::bus::InMemoryBus;
use crate::clock::ManualClock;
use crate::config::{DispatchConfig, LockConfig};
use crate::context::EngineContext;
use crate::lock::LockPolicy;
use crate::matching::MatchingEngine;
use crate::reference::{DestinationDistanceTable, PlaceGraph, ReferenceData, StationProximityMap};
use crate::route::RouteProgressionEngine;
use crate::store::InMemoryStore;

/// Epoch millis every harness clock starts at.
pub const TEST_START_MS: i64 = 1_700_000_000_000;

/// Two attempts, no backoff: contention fails fast in tests.
pub fn fast_lock_policy() -> LockPolicy {
    LockPolicy {
        lease: Duration::from_millis(5000),
        max_attempts: 2,
        backoff: Duration::ZERO,
    }
}

pub fn test_config() -> DispatchConfig {
    let policy = fast_lock_policy();
    DispatchConfig {
        lock: LockConfig {
            lease_ms: policy.lease.as_millis() as u64,
            max_attempts: policy.max_attempts,
            backoff_ms: 0,
        },
        ..DispatchConfig::default()
    }
}

/// Route `A -15- B -5- C -30- D`, stations at A and C, destinations
/// `X`/`Y` three units apart and `Z` nine units from `X`.
pub fn sample_reference_data() -> ReferenceData {
    let mut graph = PlaceGraph::new();
    graph.insert("A", "B", 15.0);
    graph.insert("B", "C", 5.0);
    graph.insert("C", "D", 30.0);

    let mut stations = StationProximityMap::new();
    stations.insert("A", "S-A");
    stations.insert("C", "S-C");

    let mut destination_distances = DestinationDistanceTable::new();
    destination_distances.insert("X", "Y", 3);
    destination_distances.insert("X", "Z", 9);
    destination_distances.insert("C", "D", 4);

    ReferenceData {
        graph,
        stations,
        destination_distances,
    }
}

/// Owns the in-memory infrastructure and builds engines over it.
pub struct TestHarness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryStore>,
    pub bus: Arc<InMemoryBus>,
    pub config: DispatchConfig,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(TEST_START_MS));
        Self {
            store: Arc::new(InMemoryStore::new(clock.clone())),
            bus: Arc::new(InMemoryBus::new()),
            clock,
            config: test_config(),
        }
    }

    /// # Panics
    ///
    /// Panics if the in-memory store rejects the seed (never expected).
    pub fn seeded(data: &ReferenceData) -> Self {
        let harness = Self::new();
        data.seed(harness.store.as_ref())
            .expect("in-memory store accepts reference data");
        harness
    }

    pub fn context(&self) -> EngineContext {
        EngineContext::new(self.store.clone(), self.bus.clone(), self.clock.clone())
    }

    pub fn route_engine(&self) -> RouteProgressionEngine {
        RouteProgressionEngine::new(self.context(), &self.config)
    }

    pub fn matching_engine(&self) -> MatchingEngine {
        MatchingEngine::new(self.context(), &self.config)
    }

    pub fn now_ms(&self) -> i64 {
        use crate::clock::Clock;
        self.clock.now_ms()
    }
}
