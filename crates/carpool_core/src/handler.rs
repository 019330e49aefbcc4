//! Shared skeleton for bus-driven handlers:
//! decode → lock → dedup check → act → mark → release → publish → ack.

use carpool_contracts::contract::decode;
use carpool_contracts::storage_keys::LockKey;
use tracing::{debug, error, warn};

use crate::bus::{publish_outbound, Disposition, EventBus, InboundEvent, Outbound};
use crate::error::EngineError;
use crate::idempotency::IdempotencyGuard;
use crate::lock::DistributedLock;

pub(crate) struct InboundPipeline<'a> {
    pub lock: &'a DistributedLock,
    pub dedup: &'a IdempotencyGuard,
    pub bus: &'a dyn EventBus,
}

impl InboundPipeline<'_> {
    /// `act` runs with every lock in `locks` held and returns the events to
    /// publish once the locks are released.
    pub fn handle<E, F>(&self, payload: &[u8], locks: &[LockKey], act: F) -> Disposition
    where
        E: InboundEvent,
        F: FnOnce(&E) -> Result<Vec<Outbound>, EngineError>,
    {
        let event: E = match decode(payload) {
            Ok(event) => event,
            Err(error) => {
                warn!(namespace = ?E::NAMESPACE, %error, "dropping malformed payload");
                return Disposition::Ack;
            }
        };
        let message_id = event.message_id().to_string();

        let held = match self.lock.acquire_ordered(locks) {
            Ok(held) => held,
            Err(error) => {
                warn!(namespace = ?E::NAMESPACE, %message_id, %error, "locks unavailable, leaving message for redelivery");
                return Disposition::Redeliver;
            }
        };

        match self.dedup.already_processed(E::NAMESPACE, &message_id) {
            Ok(true) => {
                debug!(namespace = ?E::NAMESPACE, %message_id, "duplicate delivery skipped");
                return Disposition::Ack;
            }
            Ok(false) => {}
            Err(error) => {
                warn!(namespace = ?E::NAMESPACE, %message_id, %error, "dedup check failed");
                return Disposition::Redeliver;
            }
        }

        let outbound = match act(&event) {
            Ok(outbound) => outbound,
            Err(error) if error.is_transient() => {
                warn!(namespace = ?E::NAMESPACE, %message_id, %error, "transient failure, leaving message for redelivery");
                return Disposition::Redeliver;
            }
            Err(error) => {
                error!(namespace = ?E::NAMESPACE, %message_id, %error, "handler failed, dropping message");
                return Disposition::Ack;
            }
        };

        // State is already persisted at this point; a lost marker only
        // weakens dedup for this one message.
        if let Err(error) = self.dedup.mark_processed(E::NAMESPACE, &message_id) {
            error!(namespace = ?E::NAMESPACE, %message_id, %error, "failed to write dedup marker");
        }

        held.release();
        for event in outbound {
            publish_outbound(self.bus, event);
        }
        Disposition::Ack
    }
}
