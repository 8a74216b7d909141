//! # sync-types
//!
//! Event, filter and wire frame types for the nostr-sync engine.
//!
//! This crate provides the foundational types used across all nostr-sync crates:
//! - [`EventId`], [`PublicKey`], [`RelayUrl`] - Identity types
//! - [`Event`], [`EventDraft`], [`Kind`], [`Tag`] - The signed event model
//! - [`Filter`] - Subscription filters with local matching
//! - [`ProfileMetadata`] - Content of metadata events
//! - [`ClientMessage`], [`RelayMessage`] - JSON array frames
//! - [`ProtocolError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod event;
mod filter;
mod ids;
mod messages;
mod metadata;

pub use error::ProtocolError;
pub use event::{compute_id, unix_now, Event, EventDraft, Kind, Tag};
pub use filter::Filter;
pub use ids::{EventId, PublicKey, RelayUrl};
pub use messages::{ClientMessage, RelayMessage};
pub use metadata::ProfileMetadata;
