use std::sync::Arc;
use std::time::Duration;

use carpool_contracts::contract::Topic;
use carpool_core::bus::{Disposition, MessageSource};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub type MessageHandler = Arc<dyn Fn(&[u8]) -> Disposition + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub acked: usize,
    pub redelivered: usize,
}

/// Handles everything currently pending on `topic`.
///
/// Stops at the first message left for redelivery: it goes back to the head
/// of the topic and is retried on the next poll, which keeps per-topic order.
pub fn drain_topic(
    topic: Topic,
    source: &dyn MessageSource,
    handler: &(dyn Fn(&[u8]) -> Disposition + Send + Sync),
) -> DrainStats {
    let mut stats = DrainStats::default();
    while let Some(message) = source.poll(topic) {
        match handler(&message.payload) {
            Disposition::Ack => stats.acked += 1,
            Disposition::Redeliver => {
                debug!(%topic, key = %message.key, "message left for redelivery");
                source.requeue(topic, message);
                stats.redelivered += 1;
                break;
            }
        }
    }
    stats
}

/// Polls one topic every `poll_interval` until cancelled.
pub fn spawn_consumer(
    topic: Topic,
    source: Arc<dyn MessageSource>,
    handler: MessageHandler,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%topic, "consumer stopped");
                    break;
                }
                _ = tokio::time::sleep(poll_interval) => {
                    let source = source.clone();
                    let handler = handler.clone();
                    let drained = tokio::task::spawn_blocking(move || {
                        drain_topic(topic, source.as_ref(), handler.as_ref())
                    })
                    .await;
                    if let Err(join_error) = drained {
                        error!(%topic, %join_error, "consumer batch panicked");
                    }
                }
            }
        }
    })
}
