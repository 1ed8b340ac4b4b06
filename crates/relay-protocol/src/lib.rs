//! # payrelay-protocol
//!
//! Wire protocol definitions for the Payrelay payment relay.
//!
//! Clients speak JSON over WebSocket text frames. Every inbound frame has the
//! shape `{ "type": <kind>, "data": <object> }`:
//!
//! - `0` - Register: `{ "channelId": <uint> }`
//! - `1` - Payment: `{ "payer", "recipient", "channelId", "value", "sig": {"s","v","r"}, "timestamp" }`
//!
//! Payments are delivered to the other channel members as the bare event object.
//!
//! ## Example
//!
//! ```rust
//! use payrelay_protocol::{codec, Message, RegisterRequest};
//!
//! let frame = codec::decode_frame(br#"{"type":0,"data":{"channelId":7}}"#).unwrap();
//! let (kind, payload) = frame.into_parts();
//! let message = codec::decode_message(kind, &payload).unwrap();
//! assert_eq!(message, Message::Register(RegisterRequest { channel_id: 7 }));
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode_frame, decode_message, decode_payment, encode_frame, encode_payment, ProtocolError};
pub use frames::{ChannelId, Frame, FrameKind, Message, PaymentEvent, RegisterRequest, Signature};
