//! The relay loop.
//!
//! [`Hub`] is the single task that owns the [`Registry`]. Connections talk to
//! it through a [`HubHandle`]: envelopes and unregistrations go in over
//! queues, and the loop applies them one at a time. Nothing else mutates the
//! registry.

use crate::broadcaster::Broadcaster;
use crate::envelope::Envelope;
use crate::registry::{Registry, RegistryStats};
use crate::subscriber::{Subscriber, SubscriberId};
use payrelay_protocol::{ChannelId, Message, ProtocolError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Payload could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The envelope queue is full.
    #[error("Relay hub is busy")]
    HubBusy,

    /// The relay loop has stopped.
    #[error("Relay hub is not running")]
    HubClosed,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the inbound envelope queue.
    pub envelope_capacity: usize,
    /// Whether channels left empty by an unregister are dropped.
    pub prune_empty_channels: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            envelope_capacity: 1024,
            prune_empty_channels: true,
        }
    }
}

/// Read-only requests answered by the loop.
enum Query {
    Stats(oneshot::Sender<RegistryStats>),
    Members(ChannelId, oneshot::Sender<Vec<SubscriberId>>),
    ChannelsOf(Subscriber, oneshot::Sender<Vec<ChannelId>>),
}

/// Work arriving on the ordered inbound queue.
///
/// Queries share the queue with envelopes, so a query is answered after
/// every envelope submitted before it and is never overtaken by later ones.
enum Inbound {
    Envelope(Envelope),
    Query(Query),
}

/// The relay loop and the state it owns.
pub struct Hub {
    registry: Registry,
    broadcaster: Broadcaster,
    unregisters: mpsc::UnboundedReceiver<Subscriber>,
    inbound: mpsc::Receiver<Inbound>,
}

impl Hub {
    /// Create a hub and a handle for submitting work to it.
    ///
    /// The hub does nothing until [`Hub::run`] is polled.
    #[must_use]
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.envelope_capacity.max(1));

        let hub = Self {
            registry: Registry::with_pruning(config.prune_empty_channels),
            broadcaster: Broadcaster::new(unregister_tx.clone()),
            unregisters: unregister_rx,
            inbound: inbound_rx,
        };
        let handle = HubHandle {
            unregisters: unregister_tx,
            inbound: inbound_tx,
        };

        info!("Creating relay hub with config: {:?}", config);
        (hub, handle)
    }

    /// Create a hub and run it on a new task.
    #[must_use]
    pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        (handle, tokio::spawn(hub.run()))
    }

    /// Run the relay loop.
    ///
    /// Pending unregistrations are always applied before the next envelope,
    /// so an eviction takes effect before any later broadcast. Envelopes and
    /// queries are served first in, first out. Returns once every
    /// [`HubHandle`] has been dropped.
    pub async fn run(mut self) {
        debug!("Relay hub running");

        loop {
            tokio::select! {
                biased;

                Some(subscriber) = self.unregisters.recv() => {
                    self.handle_unregister(&subscriber);
                }

                inbound = self.inbound.recv() => match inbound {
                    Some(Inbound::Envelope(envelope)) => self.handle_envelope(envelope),
                    Some(Inbound::Query(query)) => self.handle_query(query),
                    None => break,
                },
            }
        }

        info!("Relay hub stopped");
    }

    fn handle_unregister(&mut self, subscriber: &Subscriber) {
        let removed = self.registry.unregister(subscriber);
        trace!(subscriber = %subscriber.id(), removed, "Unregister processed");
    }

    fn handle_envelope(&mut self, envelope: Envelope) {
        let message = match envelope.decode() {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    subscriber = %envelope.subscriber.id(),
                    kind = ?envelope.kind,
                    data = %String::from_utf8_lossy(&envelope.payload),
                    error = %e,
                    "Dropping undecodable envelope"
                );
                return;
            }
        };

        trace!(
            subscriber = %envelope.subscriber.id(),
            kind = ?message.kind(),
            channel = message.channel_id(),
            "Envelope decoded"
        );

        match message {
            // A closed buffer means the subscriber was evicted or disconnected;
            // it must not come back through a Register still in the queue.
            Message::Register(_) if envelope.subscriber.is_closed() => {
                debug!(
                    subscriber = %envelope.subscriber.id(),
                    channel = message.channel_id(),
                    "Ignoring register from closed subscriber"
                );
            }
            Message::Register(request) => {
                self.registry.register(&envelope.subscriber, request.channel_id);
            }
            Message::Payment(event) => {
                match self.broadcaster.broadcast(
                    &self.registry,
                    event.channel_id,
                    &envelope.subscriber,
                    &event,
                ) {
                    Ok(report) => {
                        debug!(
                            channel = event.channel_id,
                            sender = %envelope.subscriber.id(),
                            delivered = report.delivered,
                            evicted = report.evicted,
                            "Payment relayed"
                        );
                    }
                    Err(e) => {
                        warn!(
                            channel = event.channel_id,
                            sender = %envelope.subscriber.id(),
                            error = %e,
                            "Payment broadcast failed"
                        );
                    }
                }
            }
        }
    }

    fn handle_query(&self, query: Query) {
        // A requester that gave up waiting is not an error.
        match query {
            Query::Stats(reply) => {
                let _ = reply.send(self.registry.stats());
            }
            Query::Members(channel_id, reply) => {
                let members = self
                    .registry
                    .members(channel_id)
                    .iter()
                    .map(Subscriber::id)
                    .collect();
                let _ = reply.send(members);
            }
            Query::ChannelsOf(subscriber, reply) => {
                let _ = reply.send(self.registry.channels_of(&subscriber));
            }
        }
    }
}

/// Handle for submitting work to a running [`Hub`].
#[derive(Clone)]
pub struct HubHandle {
    unregisters: mpsc::UnboundedSender<Subscriber>,
    inbound: mpsc::Sender<Inbound>,
}

impl HubHandle {
    /// Submit an envelope, waiting for queue space if necessary.
    ///
    /// Envelopes submitted through one handle are processed in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn submit(&self, envelope: Envelope) -> Result<(), RelayError> {
        self.inbound
            .send(Inbound::Envelope(envelope))
            .await
            .map_err(|_| RelayError::HubClosed)
    }

    /// Submit an envelope without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue is full or the hub has stopped.
    pub fn try_submit(&self, envelope: Envelope) -> Result<(), RelayError> {
        self.inbound.try_send(Inbound::Envelope(envelope)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RelayError::HubBusy,
            mpsc::error::TrySendError::Closed(_) => RelayError::HubClosed,
        })
    }

    /// Request removal of a subscriber from every channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub fn unregister(&self, subscriber: Subscriber) -> Result<(), RelayError> {
        self.unregisters
            .send(subscriber)
            .map_err(|_| RelayError::HubClosed)
    }

    /// Get registry statistics.
    ///
    /// Like every query, the answer reflects all envelopes submitted
    /// through this handle before the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn stats(&self) -> Result<RegistryStats, RelayError> {
        self.query(Query::Stats).await
    }

    /// Get the members of a channel in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn members(&self, channel_id: ChannelId) -> Result<Vec<SubscriberId>, RelayError> {
        self.query(|reply| Query::Members(channel_id, reply)).await
    }

    /// Get the channels a subscriber belongs to.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn channels_of(&self, subscriber: &Subscriber) -> Result<Vec<ChannelId>, RelayError> {
        let subscriber = subscriber.clone();
        self.query(|reply| Query::ChannelsOf(subscriber, reply)).await
    }

    async fn query<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Query,
    ) -> Result<T, RelayError> {
        let (reply, response) = oneshot::channel();
        self.inbound
            .send(Inbound::Query(build(reply)))
            .await
            .map_err(|_| RelayError::HubClosed)?;
        response.await.map_err(|_| RelayError::HubClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::{Outbound, SendOutcome};
    use bytes::Bytes;
    use payrelay_protocol::{codec, Frame, FrameKind, PaymentEvent, Signature};
    use std::time::Duration;

    fn payment(channel_id: ChannelId, value: u64) -> PaymentEvent {
        PaymentEvent {
            payer: "0xa".into(),
            recipient: "0xb".into(),
            channel_id,
            value,
            sig: Signature {
                s: "s".into(),
                v: "v".into(),
                r: "r".into(),
            },
            timestamp: 1_700_000_000,
        }
    }

    async fn register(handle: &HubHandle, subscriber: &Subscriber, channel_id: ChannelId) {
        let frame = Frame::register(channel_id).unwrap();
        handle
            .submit(Envelope::from_frame(subscriber.clone(), frame))
            .await
            .unwrap();
    }

    async fn pay(handle: &HubHandle, subscriber: &Subscriber, event: &PaymentEvent) {
        let frame = Frame::payment(event).unwrap();
        handle
            .submit(Envelope::from_frame(subscriber.clone(), frame))
            .await
            .unwrap();
    }

    fn received(outbound: &mut Outbound) -> Vec<PaymentEvent> {
        std::iter::from_fn(|| outbound.try_recv())
            .map(|payload| codec::decode_payment(&payload).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_payment_reaches_other_members() {
        let (handle, _task) = Hub::spawn(HubConfig::default());
        let (a, mut ra) = Subscriber::new(8);
        let (b, mut rb) = Subscriber::new(8);
        let (c, mut rc) = Subscriber::new(8);

        for sub in [&a, &b, &c] {
            register(&handle, sub, 7).await;
        }
        let event = payment(7, 100);
        pay(&handle, &a, &event).await;

        // The query is answered after every earlier envelope.
        assert_eq!(handle.stats().await.unwrap().total_memberships, 3);

        assert!(received(&mut ra).is_empty());
        assert_eq!(received(&mut rb), vec![event.clone()]);
        assert_eq!(received(&mut rc), vec![event]);
    }

    #[tokio::test]
    async fn test_double_register_single_membership() {
        let (handle, _task) = Hub::spawn(HubConfig::default());
        let (a, _ra) = Subscriber::new(1);

        register(&handle, &a, 7).await;
        register(&handle, &a, 7).await;

        assert_eq!(handle.members(7).await.unwrap(), vec![a.id()]);
    }

    #[tokio::test]
    async fn test_slow_subscriber_evicted() {
        let (handle, _task) = Hub::spawn(HubConfig::default());
        let (a, _ra) = Subscriber::new(8);
        let (b, mut rb) = Subscriber::new(1);
        let (c, mut rc) = Subscriber::new(8);

        for sub in [&a, &b, &c] {
            register(&handle, sub, 7).await;
        }
        register(&handle, &b, 8).await;
        assert_eq!(b.try_send(Bytes::from_static(b"backlog")), SendOutcome::Queued);

        let event = payment(7, 100);
        pay(&handle, &a, &event).await;

        assert_eq!(handle.members(7).await.unwrap(), vec![a.id(), c.id()]);
        assert!(handle.channels_of(&b).await.unwrap().is_empty());
        assert_eq!(received(&mut rc), vec![event]);

        // The evicted buffer drains what it had and then ends.
        assert_eq!(rb.recv().await.as_deref(), Some(&b"backlog"[..]));
        assert!(rb.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_explicit_unregister() {
        let (handle, _task) = Hub::spawn(HubConfig::default());
        let (a, _ra) = Subscriber::new(1);
        let (b, _rb) = Subscriber::new(1);

        register(&handle, &a, 1).await;
        register(&handle, &a, 2).await;
        register(&handle, &b, 2).await;

        handle.unregister(a.clone()).unwrap();
        handle.unregister(a.clone()).unwrap();
        handle.unregister(Subscriber::new(1).0).unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.channel_count, 1);
        assert_eq!(stats.subscriber_count, 1);
        assert_eq!(handle.members(2).await.unwrap(), vec![b.id()]);
    }

    #[tokio::test]
    async fn test_empty_channels_kept_when_pruning_disabled() {
        let config = HubConfig {
            prune_empty_channels: false,
            ..HubConfig::default()
        };
        let (handle, _task) = Hub::spawn(config);
        let (a, _ra) = Subscriber::new(1);

        register(&handle, &a, 3).await;
        handle.unregister(a).unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.channel_count, 1);
        assert_eq!(stats.total_memberships, 0);
    }

    #[tokio::test]
    async fn test_malformed_envelopes_dropped() {
        let (handle, _task) = Hub::spawn(HubConfig::default());
        let (a, _ra) = Subscriber::new(1);
        let (b, mut rb) = Subscriber::new(4);
        register(&handle, &b, 7).await;

        handle
            .submit(Envelope::new(a.clone(), FrameKind::Register, &b"{\"channelId\":-1}"[..]))
            .await
            .unwrap();
        handle
            .submit(Envelope::new(a.clone(), FrameKind::Payment, &b"{\"channelId\":\"7\"}"[..]))
            .await
            .unwrap();
        handle
            .submit(Envelope::new(a.clone(), FrameKind::Payment, &b"not json"[..]))
            .await
            .unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.total_memberships, 1);
        assert!(received(&mut rb).is_empty());

        // The loop keeps going after bad input.
        let event = payment(7, 1);
        pay(&handle, &a, &event).await;
        handle.stats().await.unwrap();
        assert_eq!(received(&mut rb), vec![event]);
    }

    #[tokio::test]
    async fn test_partial_payloads_use_zero_values() {
        let (handle, _task) = Hub::spawn(HubConfig::default());
        let (a, _ra) = Subscriber::new(1);
        let (b, mut rb) = Subscriber::new(4);
        register(&handle, &b, 7).await;

        handle
            .submit(Envelope::new(a.clone(), FrameKind::Register, &b"{}"[..]))
            .await
            .unwrap();
        let partial = br#"{"payer":"x","recipient":"y","channelId":7,"value":5}"#;
        handle
            .submit(Envelope::new(a.clone(), FrameKind::Payment, &partial[..]))
            .await
            .unwrap();

        assert_eq!(handle.channels_of(&a).await.unwrap(), vec![0]);
        let expected = PaymentEvent {
            payer: "x".into(),
            recipient: "y".into(),
            channel_id: 7,
            value: 5,
            ..PaymentEvent::default()
        };
        assert_eq!(received(&mut rb), vec![expected]);
    }

    #[tokio::test]
    async fn test_queued_register_after_removal_ignored() {
        let (hub, handle) = Hub::new(HubConfig::default());
        let (a, _ra) = Subscriber::new(1);

        // Disconnect while the register is still queued.
        register(&handle, &a, 1).await;
        a.close();
        handle.unregister(a.clone()).unwrap();
        let _task = tokio::spawn(hub.run());

        assert!(handle.channels_of(&a).await.unwrap().is_empty());
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.total_memberships, 0);
        assert_eq!(stats.channel_count, 0);
    }

    #[tokio::test]
    async fn test_evicted_subscriber_stays_removed() {
        let (handle, _task) = Hub::spawn(HubConfig::default());
        let (a, _ra) = Subscriber::new(8);
        let (b, _rb) = Subscriber::new(1);
        register(&handle, &a, 7).await;
        register(&handle, &b, 7).await;
        assert_eq!(b.try_send(Bytes::from_static(b"backlog")), SendOutcome::Queued);

        pay(&handle, &a, &payment(7, 1)).await;
        register(&handle, &b, 8).await;

        assert_eq!(handle.members(7).await.unwrap(), vec![a.id()]);
        assert!(handle.channels_of(&b).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queries_answered_under_envelope_load() {
        let (handle, _task) = Hub::spawn(HubConfig {
            envelope_capacity: 8,
            ..HubConfig::default()
        });
        let (a, _ra) = Subscriber::new(1);

        let producer = {
            let handle = handle.clone();
            tokio::spawn(async move {
                let event = payment(9, 1);
                loop {
                    pay(&handle, &a, &event).await;
                }
            })
        };
        tokio::task::yield_now().await;

        for _ in 0..100 {
            let stats = tokio::time::timeout(Duration::from_secs(5), handle.stats())
                .await
                .expect("stats query starved")
                .unwrap();
            assert_eq!(stats.total_memberships, 0);
        }
        producer.abort();
    }

    #[tokio::test]
    async fn test_sender_need_not_be_member() {
        let (handle, _task) = Hub::spawn(HubConfig::default());
        let (outsider, _ro) = Subscriber::new(1);
        let (b, mut rb) = Subscriber::new(4);
        register(&handle, &b, 7).await;

        let event = payment(7, 3);
        pay(&handle, &outsider, &event).await;
        handle.stats().await.unwrap();

        assert_eq!(received(&mut rb), vec![event]);
    }

    #[tokio::test]
    async fn test_per_producer_order() {
        let (handle, _task) = Hub::spawn(HubConfig::default());
        let (a, _ra) = Subscriber::new(16);
        let (b, mut rb) = Subscriber::new(16);
        register(&handle, &a, 1).await;
        register(&handle, &b, 1).await;

        for value in 0..10 {
            pay(&handle, &a, &payment(1, value)).await;
        }
        handle.stats().await.unwrap();

        let values: Vec<u64> = received(&mut rb).iter().map(|e| e.value).collect();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_try_submit_busy() {
        let config = HubConfig {
            envelope_capacity: 1,
            ..HubConfig::default()
        };
        // Not running, so nothing drains the queue.
        let (_hub, handle) = Hub::new(config);
        let (a, _ra) = Subscriber::new(1);

        let envelope = Envelope::from_frame(a, Frame::register(1).unwrap());
        handle.try_submit(envelope.clone()).unwrap();
        assert!(matches!(
            handle.try_submit(envelope),
            Err(RelayError::HubBusy)
        ));
    }

    #[tokio::test]
    async fn test_hub_stops_when_handles_dropped() {
        let (hub, handle) = Hub::new(HubConfig::default());
        let task = tokio::spawn(hub.run());

        let other = handle.clone();
        drop(handle);
        drop(other);

        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_reports_closed_hub() {
        let (hub, handle) = Hub::new(HubConfig::default());
        drop(hub);

        let (a, _ra) = Subscriber::new(1);
        assert!(matches!(handle.stats().await, Err(RelayError::HubClosed)));
        assert!(matches!(handle.unregister(a), Err(RelayError::HubClosed)));
    }
}
