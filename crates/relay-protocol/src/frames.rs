//! Frame types for the Payrelay protocol.
//!
//! Every inbound message is a JSON object with a numeric `type` discriminant
//! and an opaque `data` object. The discriminant decides how `data` is read.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::{to_raw_value, RawValue};

use crate::codec::ProtocolError;

/// A channel identifier.
pub type ChannelId = u64;

/// Frame kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameKind {
    /// Join a channel.
    Register = 0,
    /// Relay a payment to the other members of a channel.
    Payment = 1,
}

impl From<FrameKind> for u8 {
    fn from(kind: FrameKind) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for FrameKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameKind::Register),
            1 => Ok(FrameKind::Payment),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

/// A wire frame as received from a client.
///
/// `data` is kept as raw JSON so the relay can decide later, and only once,
/// how to interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Frame discriminant.
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// Undecoded payload.
    pub data: Box<RawValue>,
}

impl Frame {
    /// Create a Register frame for the given channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be serialized.
    pub fn register(channel_id: ChannelId) -> Result<Self, ProtocolError> {
        Ok(Frame {
            kind: FrameKind::Register,
            data: to_raw_value(&RegisterRequest { channel_id })?,
        })
    }

    /// Create a Payment frame carrying the given event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be serialized.
    pub fn payment(event: &PaymentEvent) -> Result<Self, ProtocolError> {
        Ok(Frame {
            kind: FrameKind::Payment,
            data: to_raw_value(event)?,
        })
    }

    /// Split the frame into its discriminant and raw payload bytes.
    #[must_use]
    pub fn into_parts(self) -> (FrameKind, Bytes) {
        let text: Box<str> = self.data.into();
        (self.kind, Bytes::from(String::from(text)))
    }
}

/// Request to join a channel.
///
/// Missing fields decode to their zero value, so `{}` joins channel 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Channel to join.
    pub channel_id: ChannelId,
}

/// Payment signature components, carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Signature {
    pub s: String,
    pub v: String,
    pub r: String,
}

/// A payment event relayed between channel members.
///
/// The relay only looks at `channel_id`; everything else is opaque. Absent
/// fields take their zero value, but a field of the wrong type is an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PaymentEvent {
    pub payer: String,
    pub recipient: String,
    pub channel_id: ChannelId,
    pub value: u64,
    pub sig: Signature,
    pub timestamp: u64,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Register(RegisterRequest),
    Payment(PaymentEvent),
}

impl Message {
    /// Get the frame kind this message was decoded from.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self {
            Message::Register(_) => FrameKind::Register,
            Message::Payment(_) => FrameKind::Payment,
        }
    }

    /// Get the channel this message targets.
    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        match self {
            Message::Register(request) => request.channel_id,
            Message::Payment(event) => event.channel_id,
        }
    }
}
