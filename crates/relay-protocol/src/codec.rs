//! JSON codec for Payrelay frames and payloads.
//!
//! Inbound frames are decoded in two steps: the outer `{type, data}` object
//! first, then `data` according to the frame kind. Outbound payment payloads
//! are the bare JSON encoding of the event.

use bytes::Bytes;
use thiserror::Error;

use crate::frames::{Frame, FrameKind, Message, PaymentEvent, RegisterRequest};

/// Maximum inbound frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Unknown frame discriminant.
    #[error("Unknown frame kind: {0}")]
    UnknownKind(u8),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode the outer frame from bytes.
///
/// # Errors
///
/// Returns an error if the data is too large or not a valid frame.
pub fn decode_frame(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }
    Ok(serde_json::from_slice(data)?)
}

/// Encode a frame to bytes.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_frame(frame: &Frame) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(serde_json::to_vec(frame)?))
}

/// Decode a frame payload according to its kind.
///
/// # Errors
///
/// Returns an error if the payload is not a JSON object or a field has the
/// wrong type. Missing fields take their zero value.
pub fn decode_message(kind: FrameKind, payload: &[u8]) -> Result<Message, ProtocolError> {
    let message = match kind {
        FrameKind::Register => {
            Message::Register(serde_json::from_slice::<RegisterRequest>(payload)?)
        }
        FrameKind::Payment => Message::Payment(decode_payment(payload)?),
    };
    Ok(message)
}

/// Encode a payment event for delivery.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_payment(event: &PaymentEvent) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(serde_json::to_vec(event)?))
}

/// Decode a delivered payment event.
///
/// # Errors
///
/// Returns an error if the data is not a payment event.
pub fn decode_payment(data: &[u8]) -> Result<PaymentEvent, ProtocolError> {
    Ok(serde_json::from_slice(data)?)
}
