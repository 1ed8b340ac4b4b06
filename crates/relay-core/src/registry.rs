//! Channel membership registry.
//!
//! Maps each channel to the ordered list of its subscribers. The registry is
//! owned by the relay loop and mutated only there, so it needs no locking.

use crate::subscriber::{Subscriber, SubscriberId};
use payrelay_protocol::ChannelId;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Subscriber membership by channel.
#[derive(Debug)]
pub struct Registry {
    /// Members per channel, in registration order. No duplicates.
    channels: HashMap<ChannelId, Vec<Subscriber>>,
    /// Whether channels left empty by an unregister are dropped.
    prune_empty_channels: bool,
}

impl Registry {
    /// Create a registry that drops empty channels.
    #[must_use]
    pub fn new() -> Self {
        Self::with_pruning(true)
    }

    /// Create a registry with explicit empty-channel handling.
    #[must_use]
    pub fn with_pruning(prune_empty_channels: bool) -> Self {
        Self {
            channels: HashMap::new(),
            prune_empty_channels,
        }
    }

    /// Add a subscriber to a channel.
    ///
    /// Returns `true` if it was added, `false` if it was already a member.
    pub fn register(&mut self, subscriber: &Subscriber, channel_id: ChannelId) -> bool {
        if self.contains(channel_id, subscriber) {
            return false;
        }

        let members = self.channels.entry(channel_id).or_default();
        members.push(subscriber.clone());
        debug!(
            channel = channel_id,
            subscriber = %subscriber.id(),
            members = members.len(),
            "Subscriber registered"
        );
        true
    }

    /// Remove a subscriber from every channel.
    ///
    /// Returns the number of memberships removed.
    pub fn unregister(&mut self, subscriber: &Subscriber) -> usize {
        let mut removed = 0;
        for (channel_id, members) in &mut self.channels {
            let before = members.len();
            members.retain(|member| member != subscriber);
            if members.len() != before {
                removed += before - members.len();
                debug!(
                    channel = *channel_id,
                    subscriber = %subscriber.id(),
                    members = members.len(),
                    "Subscriber removed"
                );
            }
        }

        if removed > 0 && self.prune_empty_channels {
            self.channels.retain(|channel_id, members| {
                if members.is_empty() {
                    debug!(channel = *channel_id, "Dropped empty channel");
                }
                !members.is_empty()
            });
        }

        removed
    }

    /// Get the members of a channel in registration order.
    #[must_use]
    pub fn members(&self, channel_id: ChannelId) -> &[Subscriber] {
        self.channels
            .get(&channel_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Check if a subscriber is a member of a channel.
    #[must_use]
    pub fn contains(&self, channel_id: ChannelId, subscriber: &Subscriber) -> bool {
        self.members(channel_id).contains(subscriber)
    }

    /// Get the channels a subscriber belongs to, in ascending order.
    #[must_use]
    pub fn channels_of(&self, subscriber: &Subscriber) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|(_, members)| members.contains(subscriber))
            .map(|(channel_id, _)| *channel_id)
            .collect();
        channels.sort_unstable();
        channels
    }

    /// Check if a channel entry exists, even an empty one.
    #[must_use]
    pub fn channel_exists(&self, channel_id: ChannelId) -> bool {
        self.channels.contains_key(&channel_id)
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let subscribers: HashSet<SubscriberId> = self
            .channels
            .values()
            .flatten()
            .map(Subscriber::id)
            .collect();

        RegistryStats {
            channel_count: self.channels.len(),
            subscriber_count: subscribers.len(),
            total_memberships: self.channels.values().map(Vec::len).sum(),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of channel entries.
    pub channel_count: usize,
    /// Number of distinct registered subscribers.
    pub subscriber_count: usize,
    /// Total number of memberships across all channels.
    pub total_memberships: usize,
}
