//! Subscription filters.
//!
//! A filter is a conjunction of optional constraints. It is sent to relays
//! inside REQ frames and re-checked locally against every inbound event,
//! because a relay may send events that do not match what was asked for.

use crate::event::{Event, Kind};
use crate::ids::{EventId, PublicKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Event filter. Absent fields do not constrain.
///
/// A present but empty set matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Exact event ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<BTreeSet<EventId>>,
    /// Event authors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<BTreeSet<PublicKey>>,
    /// Event kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<BTreeSet<Kind>>,
    /// Pubkeys referenced by `p` tags.
    #[serde(rename = "#p", default, skip_serializing_if = "Option::is_none")]
    pub pubkeys: Option<BTreeSet<PublicKey>>,
    /// Inclusive lower bound on `created_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    /// Inclusive upper bound on `created_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    /// Result cap for the relay's initial query. Not checked locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    /// An empty filter (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to these ids.
    pub fn ids(mut self, ids: impl IntoIterator<Item = EventId>) -> Self {
        self.ids
            .get_or_insert_with(BTreeSet::new)
            .extend(ids);
        self
    }

    /// Restrict to these authors.
    pub fn authors(mut self, authors: impl IntoIterator<Item = PublicKey>) -> Self {
        self.authors
            .get_or_insert_with(BTreeSet::new)
            .extend(authors);
        self
    }

    /// Restrict to a single author.
    pub fn author(self, author: PublicKey) -> Self {
        self.authors([author])
    }

    /// Restrict to these kinds.
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = Kind>) -> Self {
        self.kinds
            .get_or_insert_with(BTreeSet::new)
            .extend(kinds);
        self
    }

    /// Restrict to a single kind.
    pub fn kind(self, kind: Kind) -> Self {
        self.kinds([kind])
    }

    /// Restrict to events whose `p` tags name one of these pubkeys.
    pub fn pubkeys(mut self, pubkeys: impl IntoIterator<Item = PublicKey>) -> Self {
        self.pubkeys
            .get_or_insert_with(BTreeSet::new)
            .extend(pubkeys);
        self
    }

    /// Restrict to events referencing a single pubkey.
    pub fn pubkey(self, pubkey: PublicKey) -> Self {
        self.pubkeys([pubkey])
    }

    /// Inclusive lower time bound.
    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    /// Inclusive upper time bound.
    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    /// Cap on stored events returned by the relay.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `event` satisfies every present constraint.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&event.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.contains(&event.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(pubkeys) = &self.pubkeys {
            if !event
                .referenced_pubkeys()
                .iter()
                .any(|pk| pubkeys.contains(pk))
            {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }
        true
    }
}
