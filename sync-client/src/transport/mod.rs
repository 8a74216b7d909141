//! Transport abstraction for nostr-sync.
//!
//! This module provides a pluggable transport layer that abstracts the
//! underlying connection mechanism (WebSocket, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented. Each relay
//! connection task exclusively owns one transport:
//! - `connect()` establishes a connection
//! - `send()` transmits one JSON text frame
//! - `recv()` receives one JSON text frame
//! - `close()` gracefully terminates
//!
//! A [`Connector`] hands out one transport per relay.
//!
//! # Example
//!
//! ```ignore
//! let mut transport = WebSocketTransport::new();
//! transport.connect(&RelayUrl::new("wss://relay.example.com")).await?;
//! transport.send(r#"["REQ","sub",{"kinds":[0]}]"#.to_string()).await?;
//! let frame = transport.recv().await?;
//! ```

mod mock;
mod websocket;

pub use mock::{MockConnector, MockTransport};
pub use websocket::{WebSocketConnector, WebSocketTransport};

use async_trait::async_trait;
use nostr_sync_types::RelayUrl;
use thiserror::Error;

/// Transport errors.
///
/// Always recoverable from the engine's point of view: the connection task
/// turns them into a reconnect.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Transport trait for exchanging protocol frames with one relay.
///
/// Implementations handle the underlying connection mechanism
/// (WebSocket, mock, etc).
#[async_trait]
pub trait Transport: Send + 'static {
    /// Connect to the relay at `url`.
    async fn connect(&mut self, url: &RelayUrl) -> Result<(), TransportError>;

    /// Send one text frame.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Receive the next text frame.
    ///
    /// Returns `Ok(None)` when the relay closed the connection. Must be
    /// cancel-safe: the connection task races it against commands.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory for per-relay transports.
pub trait Connector: Send + Sync + 'static {
    /// The transport type produced.
    type Transport: Transport;

    /// Create an unconnected transport for `relay`.
    fn transport(&self, relay: &RelayUrl) -> Self::Transport;
}
