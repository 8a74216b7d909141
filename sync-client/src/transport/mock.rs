//! Mock transport for testing.
//!
//! Allows injecting relay frames, dropping connections and capturing sent
//! frames for verification. Handles are cheap clones over shared state, so a
//! test keeps one while the connection task owns another.

use super::{Connector, Transport, TransportError};
use async_trait::async_trait;
use nostr_sync_types::{ClientMessage, RelayMessage, RelayUrl};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug)]
enum Inbound {
    Frame(String),
    Drop,
}

/// Mock transport for testing.
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connect_count: usize,
    connected_address: Option<RelayUrl>,
    sent_frames: Vec<String>,
    fail_next_connect: Option<String>,
    refuse_connections: bool,
    hang_connections: bool,
    fail_next_send: Option<String>,
    auto_ok: Option<(bool, String)>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Mutex::new(MockTransportInner::default())),
            inbound_tx,
            inbound_rx: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a frame to be returned by `recv()`.
    pub fn push_frame(&self, frame: impl Into<String>) {
        let _ = self.inbound_tx.send(Inbound::Frame(frame.into()));
    }

    /// Queue a relay message to be returned by `recv()`.
    pub fn push_message(&self, message: &RelayMessage) {
        if let Ok(frame) = message.to_json() {
            self.push_frame(frame);
        }
    }

    /// Simulate the relay closing the connection.
    pub fn drop_connection(&self) {
        let _ = self.inbound_tx.send(Inbound::Drop);
    }

    /// Get all frames that were sent.
    pub fn sent_frames(&self) -> Vec<String> {
        self.lock().sent_frames.clone()
    }

    /// Sent frames parsed back into client messages.
    pub fn sent_messages(&self) -> Vec<ClientMessage> {
        self.sent_frames()
            .iter()
            .filter_map(|f| ClientMessage::from_json(f).ok())
            .collect()
    }

    /// Forget captured frames.
    pub fn clear_sent(&self) {
        self.lock().sent_frames.clear();
    }

    /// Number of successful connects so far.
    pub fn connect_count(&self) -> usize {
        self.lock().connect_count
    }

    /// Get the address that was connected to.
    pub fn connected_address(&self) -> Option<RelayUrl> {
        self.lock().connected_address.clone()
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Make every connect() fail until turned off again.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Make every connect() hang until turned off again.
    pub fn hang_connections(&self, hang: bool) {
        self.lock().hang_connections = hang;
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Answer every published EVENT with an OK frame.
    pub fn respond_to_events(&self, accepted: bool, message: &str) {
        self.lock().auto_ok = Some((accepted, message.to_string()));
    }

    /// Wait until a sent frame satisfies `predicate`.
    ///
    /// Returns the matching frame, or `None` after `timeout`.
    pub async fn wait_for_frame<F>(&self, timeout: Duration, predicate: F) -> Option<ClientMessage>
    where
        F: Fn(&ClientMessage) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(found) = self.sent_messages().into_iter().find(|m| predicate(m)) {
                return Some(found);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self, url: &RelayUrl) -> Result<(), TransportError> {
        let hang = {
            let mut inner = self.lock();

            // Check for forced failure
            if let Some(error) = inner.fail_next_connect.take() {
                return Err(TransportError::ConnectionFailed(error));
            }
            if inner.refuse_connections {
                return Err(TransportError::ConnectionFailed("refused".into()));
            }
            inner.hang_connections
        };

        if hang {
            std::future::pending::<()>().await;
        }

        let mut inner = self.lock();
        inner.connected = true;
        inner.connect_count += 1;
        inner.connected_address = Some(url.clone());
        Ok(())
    }

    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let reply = {
            let mut inner = self.lock();

            if !inner.connected {
                return Err(TransportError::NotConnected);
            }

            // Check for forced failure
            if let Some(error) = inner.fail_next_send.take() {
                return Err(TransportError::SendFailed(error));
            }

            let reply = match (&inner.auto_ok, ClientMessage::from_json(&frame)) {
                (Some((accepted, message)), Ok(ClientMessage::Event(event))) => {
                    Some(RelayMessage::Ok {
                        event_id: event.id,
                        accepted: *accepted,
                        message: message.clone(),
                    })
                }
                _ => None,
            };
            inner.sent_frames.push(frame);
            reply
        };

        if let Some(reply) = reply {
            self.push_message(&reply);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        if !self.lock().connected {
            return Err(TransportError::NotConnected);
        }

        let next = self.inbound_rx.lock().await.recv().await;
        match next {
            Some(Inbound::Frame(frame)) => Ok(Some(frame)),
            Some(Inbound::Drop) | None => {
                self.lock().connected = false;
                Ok(None)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.lock().connected = false;
        Ok(())
    }
}

/// Connector handing out shared [`MockTransport`]s, one per relay.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    relays: Arc<Mutex<HashMap<RelayUrl, MockTransport>>>,
}

impl MockConnector {
    /// Create a connector with no relays yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The handle for `url`, created on first use.
    pub fn relay(&self, url: impl Into<RelayUrl>) -> MockTransport {
        let url = url.into();
        let mut relays = self.relays.lock().unwrap_or_else(|e| e.into_inner());
        relays.entry(url).or_default().clone()
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn transport(&self, relay: &RelayUrl) -> Self::Transport {
        self.relay(relay.clone())
    }
}
