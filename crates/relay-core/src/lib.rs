//! # payrelay-core
//!
//! The relay engine behind Payrelay: channel membership, payment fan-out and
//! the single loop that serializes both.
//!
//! - **Subscriber** - Handle to one connection and its bounded outbound buffer
//! - **Registry** - Channel to subscriber membership
//! - **Broadcaster** - Non-blocking fan-out with drop-and-evict backpressure
//! - **Hub** - The relay loop; sole owner of the registry
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ envelopes  ┌─────────────┐     ┌─────────────┐
//! │  Connection │──────────▶│     Hub     │────▶│  Registry   │
//! └─────────────┘ unregister └─────────────┘     └─────────────┘
//!        ▲                          │
//!        │     outbound buffer      ▼
//!        └──────────────────┌─────────────┐
//!                           │ Broadcaster │
//!                           └─────────────┘
//! ```
//!
//! All cross-task communication is message passing. Connections never touch
//! the registry directly.

pub mod broadcaster;
pub mod envelope;
pub mod hub;
pub mod registry;
pub mod subscriber;

pub use broadcaster::{BroadcastReport, Broadcaster};
pub use envelope::Envelope;
pub use hub::{Hub, HubConfig, HubHandle, RelayError};
pub use payrelay_protocol::ChannelId;
pub use registry::{Registry, RegistryStats};
pub use subscriber::{Outbound, SendOutcome, Subscriber, SubscriberId, DEFAULT_SEND_BUFFER};
