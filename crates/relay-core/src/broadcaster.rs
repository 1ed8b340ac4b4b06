//! Payment fan-out with drop-and-evict backpressure.
//!
//! Delivery never waits on a subscriber. A member whose outbound buffer is
//! full is treated as unreachable: its buffer is closed and it is handed back
//! to the relay loop for removal.

use crate::hub::RelayError;
use crate::registry::Registry;
use crate::subscriber::{SendOutcome, Subscriber};
use bytes::Bytes;
use payrelay_protocol::{codec, ChannelId, PaymentEvent};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Outcome of a single broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the payload was queued for.
    pub delivered: usize,
    /// Members evicted because they could not accept the payload.
    pub evicted: usize,
}

/// Delivers payloads to every channel member except the sender.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    evictions: mpsc::UnboundedSender<Subscriber>,
}

impl Broadcaster {
    /// Create a broadcaster that reports evicted subscribers on `evictions`.
    #[must_use]
    pub fn new(evictions: mpsc::UnboundedSender<Subscriber>) -> Self {
        Self { evictions }
    }

    /// Serialize a payment event and fan it out to the channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be serialized. Nothing is
    /// delivered in that case.
    pub fn broadcast(
        &self,
        registry: &Registry,
        channel_id: ChannelId,
        sender: &Subscriber,
        event: &PaymentEvent,
    ) -> Result<BroadcastReport, RelayError> {
        let payload = codec::encode_payment(event)?;
        Ok(self.broadcast_bytes(registry, channel_id, sender, payload))
    }

    /// Fan out an already serialized payload to the channel.
    pub fn broadcast_bytes(
        &self,
        registry: &Registry,
        channel_id: ChannelId,
        sender: &Subscriber,
        payload: Bytes,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for member in registry.members(channel_id) {
            if member == sender {
                continue;
            }

            match member.try_send(payload.clone()) {
                SendOutcome::Queued => report.delivered += 1,
                outcome @ (SendOutcome::Full | SendOutcome::Closed) => {
                    debug!(
                        channel = channel_id,
                        subscriber = %member.id(),
                        ?outcome,
                        "Evicting unreachable subscriber"
                    );
                    self.evict(member);
                    report.evicted += 1;
                }
            }
        }

        trace!(
            channel = channel_id,
            sender = %sender.id(),
            delivered = report.delivered,
            evicted = report.evicted,
            "Broadcast complete"
        );
        report
    }

    fn evict(&self, member: &Subscriber) {
        member.close();
        if self.evictions.send(member.clone()).is_err() {
            warn!(subscriber = %member.id(), "Eviction queue closed");
        }
    }
}
