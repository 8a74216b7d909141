//! # sync-client
//!
//! Multi-relay synchronization engine for nostr clients.
//!
//! This is the main library that applications use to keep a local User
//! projection in sync with a set of relays.
//!
//! ## Features
//!
//! - **Relay Pool**: one task per relay, reconnecting with capped backoff
//! - **Subscription Replay**: active channels are re-sent after every reconnect
//! - **Deduplication**: each event reaches local state at most once per window
//! - **Last-Write-Wins Projection**: profile and follow edges from signed events
//! - **Transport Abstraction**: pluggable transport layer (WebSocket, mock)
//! - **Pure State Machines**: uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use nostr_sync_client::{Client, ClientConfig, Keys, SqliteStore, UserFilter, WebSocketConnector};
//! use std::sync::Arc;
//!
//! let config = ClientConfig::from_file("config.toml".as_ref())?;
//! let store = Arc::new(SqliteStore::new("users.db".as_ref()).await?);
//! let client = Client::start(&config, WebSocketConnector, store, Keys::generate()?)?;
//!
//! // Show my contacts, fetching any missing profiles
//! let contacts = client.load_users(UserFilter::Contacts).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod keys;
pub mod pool;
pub mod reconciler;
pub mod storage;
pub mod transport;

mod connection;

pub use client::{Client, ClientError, ContactsView, MAIN_CHANNEL};
pub use config::{ClientConfig, ConfigError, ConnectionConfig, PoolConfig, ReconcilerConfig};
pub use keys::{KeyError, Keys, SchnorrVerifier, Signer, Verifier};
pub use pool::{parse_relay_url, PoolError, PoolStats, RelayPool, RelayStatus, SendOutcome};
pub use reconciler::{ReconcileError, Reconciled, Reconciler, ReconcilerWorker};
pub use storage::{MemoryStore, SqliteStore, StorageError, UserFilter, UserStore};
pub use transport::{
    Connector, MockConnector, MockTransport, Transport, TransportError, WebSocketConnector,
    WebSocketTransport,
};
