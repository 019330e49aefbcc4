use std::sync::Arc;

use crate::bus::EventBus;
use crate::clock::Clock;
use crate::store::KeyValueStore;

/// Shared infrastructure handles every engine is built from.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn KeyValueStore>,
    pub bus: Arc<dyn EventBus>,
    pub clock: Arc<dyn Clock>,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, bus, clock }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }
}
