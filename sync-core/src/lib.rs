//! # sync-core
//!
//! Pure logic for nostr-sync (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms for relay
//! synchronization without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (sockets, storage) is performed by `sync-client`, which
//! interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod dedup;
pub mod projection;
pub mod registry;
pub mod state;

pub use buffer::{OutboundBuffer, QueuedEvent};
pub use dedup::SeenIds;
pub use projection::{plan_contact_list, ContactListChanges, Freshness, User};
pub use registry::{Subscription, SubscriptionRegistry};
pub use state::{Action, Backoff, ConnectionEvent, ConnectionNotice, ConnectionState};
