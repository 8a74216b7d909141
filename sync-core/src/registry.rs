//! Subscription registry for nostr-sync.
//!
//! Maps channel names to the filters currently active on them and to the
//! relays they are active on. The registry is the source of truth for
//! subscriptions: a relay that (re)opens gets exactly what `filters_for`
//! returns, so connections never need to remember REQ frames themselves.
//!
//! A channel holds one filter set. Subscribing again under the same name
//! replaces it in one step here; on the wire each relay gets a CLOSE for the
//! old subscription followed by the new REQ, in that order.

use nostr_sync_types::{Event, Filter, RelayUrl};
use std::collections::{BTreeMap, BTreeSet};

/// One active subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Channel name, used as the subscription id on the wire.
    pub channel: String,
    /// Filters, OR-ed together.
    pub filters: Vec<Filter>,
    /// Relays this subscription is active on.
    pub relays: BTreeSet<RelayUrl>,
}

impl Subscription {
    /// Whether any filter of this subscription accepts `event`.
    pub fn matches(&self, event: &Event) -> bool {
        self.filters.iter().any(|f| f.matches(event))
    }
}

/// Registry of active subscriptions and known relays.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    relays: BTreeSet<RelayUrl>,
    channels: BTreeMap<String, Subscription>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a relay. Every existing channel becomes active on it and is
    /// sent once the relay reports open (see [`filters_for`](Self::filters_for)).
    pub fn add_relay(&mut self, relay: RelayUrl) {
        for sub in self.channels.values_mut() {
            sub.relays.insert(relay.clone());
        }
        self.relays.insert(relay);
    }

    /// Forget a relay. Returns whether it was known.
    pub fn remove_relay(&mut self, relay: &RelayUrl) -> bool {
        for sub in self.channels.values_mut() {
            sub.relays.remove(relay);
        }
        self.relays.remove(relay)
    }

    /// Insert or replace the filters of `channel`.
    ///
    /// Returns the relays that must receive the new REQ.
    pub fn upsert(&mut self, channel: impl Into<String>, filters: Vec<Filter>) -> Vec<RelayUrl> {
        let channel = channel.into();
        let sub = Subscription {
            channel: channel.clone(),
            filters,
            relays: self.relays.clone(),
        };
        let affected = sub.relays.iter().cloned().collect();
        self.channels.insert(channel, sub);
        affected
    }

    /// Remove `channel`. Returns the relays that must receive a CLOSE.
    pub fn remove(&mut self, channel: &str) -> Vec<RelayUrl> {
        self.channels
            .remove(channel)
            .map(|sub| sub.relays.into_iter().collect())
            .unwrap_or_default()
    }

    /// Remove every channel, returning each with the relays it was active on.
    pub fn remove_all(&mut self) -> Vec<(String, Vec<RelayUrl>)> {
        std::mem::take(&mut self.channels)
            .into_values()
            .map(|sub| (sub.channel, sub.relays.into_iter().collect()))
            .collect()
    }

    /// Every channel active on `relay`, with its filters.
    pub fn filters_for(&self, relay: &RelayUrl) -> Vec<(String, Vec<Filter>)> {
        self.channels
            .values()
            .filter(|sub| sub.relays.contains(relay))
            .map(|sub| (sub.channel.clone(), sub.filters.clone()))
            .collect()
    }

    /// Whether `event` belongs on `channel`: the channel exists and one of
    /// its filters accepts the event.
    pub fn matches(&self, channel: &str, event: &Event) -> bool {
        self.channels
            .get(channel)
            .map(|sub| sub.matches(event))
            .unwrap_or(false)
    }

    /// Look up a channel.
    pub fn get(&self, channel: &str) -> Option<&Subscription> {
        self.channels.get(channel)
    }

    /// Number of active channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel is active.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
