//! Message bus abstraction.
//!
//! Publishing is fire-and-forget: the caller hands over a completion callback
//! that is only used for logging (and, later, dead-lettering). Handlers never
//! wait on publish acknowledgment.
//!
//! Consumption is modelled by [`MessageSource`]: a consumer polls a topic,
//! runs the handler, and on [`Disposition::Redeliver`] puts the message back
//! so it is delivered again (at-least-once semantics).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use carpool_contracts::contract::{
    encode, CodecError, DriverLocationEvent, MatchResult, RideCompletionEvent, RideRequest, Topic,
};
use carpool_contracts::storage_keys::DedupNamespace;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("publish to `{topic}` failed: {message}")]
pub struct BusError {
    pub topic: Topic,
    pub message: String,
}

pub type DeliveryCallback = Box<dyn FnOnce(Result<(), BusError>) + Send>;

pub trait EventBus: Send + Sync {
    fn publish(&self, topic: Topic, key: &str, payload: Vec<u8>, on_complete: DeliveryCallback);
}

pub trait MessageSource: Send + Sync {
    fn poll(&self, topic: Topic) -> Option<BusMessage>;

    /// Put an unacknowledged message back at the head of its topic.
    fn requeue(&self, topic: Topic, message: BusMessage);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub key: String,
    pub payload: Vec<u8>,
}

/// What the consumer does with a message after the handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Redeliver,
}

/// Inbound event shape: decodable and carrying the id used for dedup.
pub trait InboundEvent: DeserializeOwned {
    const NAMESPACE: DedupNamespace;

    fn message_id(&self) -> &str;
}

impl InboundEvent for DriverLocationEvent {
    const NAMESPACE: DedupNamespace = DedupNamespace::DriverUpdate;

    fn message_id(&self) -> &str {
        &self.message_id
    }
}

impl InboundEvent for RideRequest {
    const NAMESPACE: DedupNamespace = DedupNamespace::RideRequest;

    fn message_id(&self) -> &str {
        &self.message_id
    }
}

impl InboundEvent for RideCompletionEvent {
    const NAMESPACE: DedupNamespace = DedupNamespace::RideCompletion;

    fn message_id(&self) -> &str {
        &self.message_id
    }
}

impl InboundEvent for MatchResult {
    const NAMESPACE: DedupNamespace = DedupNamespace::MatchResult;

    fn message_id(&self) -> &str {
        &self.message_id
    }
}

/// An encoded event waiting to be published once state is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub topic: Topic,
    pub key: String,
    pub payload: Vec<u8>,
}

impl Outbound {
    pub fn event<E: Serialize>(topic: Topic, key: impl Into<String>, event: &E) -> Result<Self, CodecError> {
        Ok(Self {
            topic,
            key: key.into(),
            payload: encode(event)?,
        })
    }
}

pub fn publish_outbound(bus: &dyn EventBus, outbound: Outbound) {
    let Outbound {
        topic,
        key,
        payload,
    } = outbound;
    let logged_key = key.clone();
    bus.publish(
        topic,
        &key,
        payload,
        Box::new(move |result| match result {
            Ok(()) => debug!(%topic, key = %logged_key, "event delivered"),
            Err(error) => error!(%topic, key = %logged_key, %error, "event delivery failed"),
        }),
    );
}

pub fn new_message_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Per-topic FIFO queues in process memory.
#[derive(Debug, Default)]
pub struct InMemoryBus {
    queues: Mutex<HashMap<Topic, VecDeque<BusMessage>>>,
    fail_publishes: AtomicBool,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes drop the message and report failure to the callback.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self, topic: Topic) -> usize {
        self.with_queues(|queues| queues.get(&topic).map_or(0, VecDeque::len))
    }

    pub fn is_empty(&self, topic: Topic) -> bool {
        self.len(topic) == 0
    }

    /// Remove and return everything pending on a topic.
    pub fn drain(&self, topic: Topic) -> Vec<BusMessage> {
        self.with_queues(|queues| {
            queues
                .get_mut(&topic)
                .map(|queue| queue.drain(..).collect())
                .unwrap_or_default()
        })
    }

    /// Drain a topic and decode every payload, skipping undecodable ones.
    pub fn drain_decoded<T: DeserializeOwned>(&self, topic: Topic) -> Vec<T> {
        self.drain(topic)
            .into_iter()
            .filter_map(|message| carpool_contracts::contract::decode(&message.payload).ok())
            .collect()
    }

    pub fn push(&self, topic: Topic, message: BusMessage) {
        self.with_queues(|queues| queues.entry(topic).or_default().push_back(message));
    }

    fn with_queues<R>(&self, f: impl FnOnce(&mut HashMap<Topic, VecDeque<BusMessage>>) -> R) -> R {
        // A poisoned queue map only means another thread panicked mid-push;
        // the VecDeque itself is still consistent.
        let mut queues = match self.queues.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut queues)
    }
}

impl EventBus for InMemoryBus {
    fn publish(&self, topic: Topic, key: &str, payload: Vec<u8>, on_complete: DeliveryCallback) {
        if self.fail_publishes.load(Ordering::SeqCst) {
            on_complete(Err(BusError {
                topic,
                message: "bus rejected publish".to_string(),
            }));
            return;
        }
        self.push(
            topic,
            BusMessage {
                key: key.to_string(),
                payload,
            },
        );
        on_complete(Ok(()));
    }
}

impl MessageSource for InMemoryBus {
    fn poll(&self, topic: Topic) -> Option<BusMessage> {
        self.with_queues(|queues| queues.get_mut(&topic).and_then(VecDeque::pop_front))
    }

    fn requeue(&self, topic: Topic, message: BusMessage) {
        self.with_queues(|queues| queues.entry(topic).or_default().push_front(message));
    }
}
