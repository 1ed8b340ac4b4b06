//! Shared fixtures for Payrelay benchmarks.

use payrelay_core::{Outbound, Registry, Subscriber};
use payrelay_protocol::{ChannelId, PaymentEvent, Signature};

/// A payment with realistically sized addresses and signature.
#[must_use]
pub fn sample_payment(channel_id: ChannelId, value: u64) -> PaymentEvent {
    PaymentEvent {
        payer: "0x5409ed021d9299bf6814279a6a1411a7e866a631".into(),
        recipient: "0x6ecbe1db9ef729cbe972c83fb886247691fb6beb".into(),
        channel_id,
        value,
        sig: Signature {
            s: format!("0x{}", "1".repeat(64)),
            v: "0x1b".into(),
            r: format!("0x{}", "2".repeat(64)),
        },
        timestamp: 1_700_000_000,
    }
}

/// Register `members` fresh subscribers to `channel_id`.
///
/// The outbound buffers are returned so they stay open.
pub fn populate(
    registry: &mut Registry,
    channel_id: ChannelId,
    members: usize,
    capacity: usize,
) -> Vec<(Subscriber, Outbound)> {
    (0..members)
        .map(|_| {
            let (subscriber, outbound) = Subscriber::new(capacity);
            registry.register(&subscriber, channel_id);
            (subscriber, outbound)
        })
        .collect()
}

/// Drain every buffer, returning how many payloads were waiting.
pub fn drain(members: &mut [(Subscriber, Outbound)]) -> usize {
    members
        .iter_mut()
        .map(|(_, outbound)| std::iter::from_fn(|| outbound.try_recv()).count())
        .sum()
}
