//! Inbound envelopes submitted to the relay loop.

use crate::subscriber::Subscriber;
use bytes::Bytes;
use payrelay_protocol::{codec, Frame, FrameKind, Message, ProtocolError};

/// A decoded wire frame tagged with the subscriber that sent it.
///
/// The payload stays undecoded until the relay loop handles it.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Originating subscriber.
    pub subscriber: Subscriber,
    /// Frame discriminant.
    pub kind: FrameKind,
    /// Raw JSON payload.
    pub payload: Bytes,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(subscriber: Subscriber, kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self {
            subscriber,
            kind,
            payload: payload.into(),
        }
    }

    /// Create an envelope from a received frame.
    #[must_use]
    pub fn from_frame(subscriber: Subscriber, frame: Frame) -> Self {
        let (kind, payload) = frame.into_parts();
        Self::new(subscriber, kind, payload)
    }

    /// Decode the payload according to the envelope's kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match its kind.
    pub fn decode(&self) -> Result<Message, ProtocolError> {
        codec::decode_message(self.kind, &self.payload)
    }
}
