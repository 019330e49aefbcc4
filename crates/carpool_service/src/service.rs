use std::sync::Arc;

use carpool_contracts::contract::Topic;
use carpool_core::bus::{Disposition, InMemoryBus, MessageSource};
use carpool_core::clock::SystemClock;
use carpool_core::config::DispatchConfig;
use carpool_core::context::EngineContext;
use carpool_core::matching::{MatchingEngine, RetryOutcome};
use carpool_core::reference::ReferenceData;
use carpool_core::route::RouteProgressionEngine;
use carpool_core::store::InMemoryStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::consumer::{spawn_consumer, MessageHandler};
use crate::error::ServiceError;
use crate::scheduler::spawn_fixed_rate;

/// Both engines plus the source their inbound topics are read from.
#[derive(Clone)]
pub struct DispatchService {
    routes: Arc<RouteProgressionEngine>,
    matching: Arc<MatchingEngine>,
    source: Arc<dyn MessageSource>,
    config: DispatchConfig,
}

impl DispatchService {
    pub fn new(
        ctx: EngineContext,
        source: Arc<dyn MessageSource>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            routes: Arc::new(RouteProgressionEngine::new(ctx.clone(), &config)),
            matching: Arc::new(MatchingEngine::new(ctx, &config)),
            source,
            config,
        }
    }

    /// Single-process wiring: in-memory store and bus on the wall clock,
    /// seeded with `reference`. The bus is returned so callers can feed it.
    pub fn in_memory(
        config: DispatchConfig,
        reference: &ReferenceData,
    ) -> Result<(Self, Arc<InMemoryBus>), ServiceError> {
        let clock = Arc::new(SystemClock);
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        reference.seed(store.as_ref())?;

        let bus = Arc::new(InMemoryBus::new());
        let ctx = EngineContext::new(store, bus.clone(), clock);
        Ok((Self::new(ctx, bus.clone(), config), bus))
    }

    pub fn routes(&self) -> &RouteProgressionEngine {
        &self.routes
    }

    pub fn matching(&self) -> &MatchingEngine {
        &self.matching
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Route one inbound payload to the engine that consumes `topic`.
    pub fn dispatch(&self, topic: Topic, payload: &[u8]) -> Disposition {
        match topic {
            Topic::DriverUpdates => self.matching.handle_driver_location(payload),
            Topic::RideRequests => self.matching.handle_ride_request(payload),
            Topic::RideCompletions => self.matching.handle_ride_completion(payload),
            Topic::RiderDriverMatch => self.routes.handle_match_result(payload),
        }
    }

    /// Spawns the route tick, the waiting-queue retry and one consumer per
    /// topic. Everything stops when `cancel` fires.
    pub fn start(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(Topic::ALL.len() + 2);

        let routes = self.routes.clone();
        handles.push(spawn_fixed_rate(
            "route-tick",
            self.config.route.tick_period(),
            cancel.child_token(),
            move || {
                if let Err(err) = routes.tick() {
                    error!(error = %err, "route tick failed");
                }
            },
        ));

        let matching = self.matching.clone();
        handles.push(spawn_fixed_rate(
            "waiting-queue-retry",
            self.config.matching.retry_period(),
            cancel.child_token(),
            move || match matching.retry_waiting_tick() {
                Ok(RetryOutcome::Idle) => {}
                Ok(outcome) => debug!(?outcome, "waiting queue retried"),
                Err(err) => error!(error = %err, "waiting queue retry failed"),
            },
        ));

        for topic in Topic::ALL {
            let service = self.clone();
            let handler: MessageHandler =
                Arc::new(move |payload: &[u8]| service.dispatch(topic, payload));
            handles.push(spawn_consumer(
                topic,
                self.source.clone(),
                handler,
                self.config.bus.poll_interval(),
                cancel.child_token(),
            ));
        }

        info!(
            tick_period_ms = self.config.route.tick_period_ms,
            retry_period_ms = self.config.matching.retry_period_ms,
            "dispatch service started"
        );
        handles
    }
}
