//! Relay pool: one coordinator task fanning subscriptions and publishes out
//! to every relay connection and funnelling their events back in.
//!
//! The coordinator owns the subscription registry and the dedup window. API
//! calls are messages processed one at a time, so concurrent calls apply in
//! arrival order. Inbound events pass, in order: channel filter check, dedup
//! check, id and signature verification, dedup insert, last-event marker,
//! then the bounded queue to the reconciler.

use crate::config::{ClientConfig, ConnectionConfig};
use crate::connection::{self, ConnectionCommand, ConnectionHandle, ConnectionReport};
use crate::keys::Verifier;
use crate::transport::Connector;
use nostr_sync_core::{ConnectionNotice, ConnectionState, SeenIds, SubscriptionRegistry};
use nostr_sync_types::{Event, EventId, Filter, RelayUrl};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Pool errors.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No relay accepted a published event.
    #[error("no relay accepted the event ({attempted} attempted)")]
    NoRelayAccepted {
        /// Relays the event was sent to.
        attempted: usize,
        /// Per-relay rejection or failure messages.
        rejections: Vec<(RelayUrl, String)>,
    },

    /// The pool has shut down.
    #[error("relay pool is shut down")]
    Shutdown,

    /// A relay URL could not be used.
    #[error("invalid relay url {url}: {reason}")]
    InvalidRelayUrl {
        /// The URL as given.
        url: String,
        /// Why it was refused.
        reason: String,
    },
}

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// The published event.
    pub event_id: EventId,
    /// First relay that accepted it.
    pub relay: RelayUrl,
    /// That relay's OK message.
    pub message: String,
}

/// Connection state of one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStatus {
    /// Relay URL.
    pub url: RelayUrl,
    /// Current state as last reported by its connection.
    pub state: ConnectionState,
}

/// Ingest counters for monitoring pool activity.
///
/// All counters are monotonically increasing.
/// Thread-safe via `AtomicU64`, no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// EVENT frames received from any relay.
    pub received: AtomicU64,
    /// Events dropped because their id was already seen.
    pub duplicates: AtomicU64,
    /// Events dropped for a bad id or signature.
    pub invalid: AtomicU64,
    /// Events dropped for an unknown channel or non-matching filter.
    pub filtered: AtomicU64,
    /// Events forwarded to the reconciler.
    pub accepted: AtomicU64,
}

impl PoolStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Parse and validate a relay URL (`ws://` or `wss://`).
pub fn parse_relay_url(url: &str) -> Result<RelayUrl, PoolError> {
    let invalid = |reason: String| PoolError::InvalidRelayUrl {
        url: url.to_string(),
        reason,
    };
    let parsed = url::Url::parse(url.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host".into()));
    }
    Ok(RelayUrl::new(url))
}

type Reply<T> = oneshot::Sender<T>;

enum PoolCommand {
    Subscribe {
        channel: String,
        filters: Vec<Filter>,
        reply: Reply<()>,
    },
    Unsubscribe {
        channel: String,
        reply: Reply<()>,
    },
    UnsubscribeAll {
        reply: Reply<()>,
    },
    Send {
        event: Event,
        reply: Reply<Result<SendOutcome, PoolError>>,
    },
    AddRelay {
        url: RelayUrl,
        reply: Reply<()>,
    },
    RemoveRelay {
        url: RelayUrl,
        reply: Reply<bool>,
    },
    RelayStates {
        reply: Reply<Vec<RelayStatus>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Handle to the relay pool.
#[derive(Debug)]
pub struct RelayPool {
    commands: mpsc::Sender<PoolCommand>,
    last_event: watch::Receiver<Option<EventId>>,
    open_relays: watch::Receiver<usize>,
    stats: Arc<PoolStats>,
    task: JoinHandle<()>,
}

impl RelayPool {
    /// Start the coordinator and one connection per configured relay.
    ///
    /// Accepted events are delivered to `events`; when it is full the pool
    /// stops reading from relays until there is room.
    pub fn start<C: Connector>(
        config: &ClientConfig,
        connector: C,
        verifier: Arc<dyn Verifier>,
        events: mpsc::Sender<Event>,
    ) -> Result<Self, PoolError> {
        let relays = config
            .relays
            .iter()
            .map(|url| parse_relay_url(url))
            .collect::<Result<Vec<_>, _>>()?;

        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (reports_tx, reports_rx) = mpsc::channel(config.pool.inbound_queue.max(1));
        let (last_event_tx, last_event_rx) = watch::channel(None);
        let (open_tx, open_rx) = watch::channel(0);
        let stats = Arc::new(PoolStats::default());

        let mut actor = PoolActor {
            connector,
            connection_config: config.connection.clone(),
            registry: SubscriptionRegistry::new(),
            seen: SeenIds::new(config.pool.dedup_capacity),
            verifier,
            connections: BTreeMap::new(),
            sends: HashMap::new(),
            events,
            last_event: last_event_tx,
            open_relays: open_tx,
            stats: Arc::clone(&stats),
            commands: commands_rx,
            reports_tx: Some(reports_tx),
            reports_rx,
        };
        for relay in relays {
            actor.add_relay(relay);
        }

        Ok(Self {
            commands: commands_tx,
            last_event: last_event_rx,
            open_relays: open_rx,
            stats,
            task: tokio::spawn(actor.run()),
        })
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> PoolCommand) -> Result<T, PoolError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| PoolError::Shutdown)?;
        rx.await.map_err(|_| PoolError::Shutdown)
    }

    /// Subscribe `channel` to one filter on every relay.
    pub async fn subscribe(&self, channel: impl Into<String>, filter: Filter) -> Result<(), PoolError> {
        self.subscribe_filters(channel, vec![filter]).await
    }

    /// Subscribe `channel` to several filters (OR-ed) on every relay.
    ///
    /// Re-subscribing an active channel replaces its filters.
    pub async fn subscribe_filters(
        &self,
        channel: impl Into<String>,
        filters: Vec<Filter>,
    ) -> Result<(), PoolError> {
        let channel = channel.into();
        self.request(|reply| PoolCommand::Subscribe {
            channel,
            filters,
            reply,
        })
        .await
    }

    /// Close `channel` on every relay. Unknown channels are ignored.
    pub async fn unsubscribe(&self, channel: impl Into<String>) -> Result<(), PoolError> {
        let channel = channel.into();
        self.request(|reply| PoolCommand::Unsubscribe { channel, reply })
            .await
    }

    /// Close every channel on every relay.
    pub async fn unsubscribe_all(&self) -> Result<(), PoolError> {
        self.request(|reply| PoolCommand::UnsubscribeAll { reply })
            .await
    }

    /// Publish a signed event to every open relay.
    ///
    /// Resolves on the first acceptance. Fails when no relay is open or
    /// every relay rejected or failed.
    pub async fn send_event(&self, event: Event) -> Result<SendOutcome, PoolError> {
        self.request(|reply| PoolCommand::Send { event, reply })
            .await?
    }

    /// Add a relay and start connecting to it.
    pub async fn add_relay(&self, url: &str) -> Result<(), PoolError> {
        let url = parse_relay_url(url)?;
        self.request(|reply| PoolCommand::AddRelay { url, reply })
            .await
    }

    /// Disconnect and forget a relay. Returns whether it was known.
    pub async fn remove_relay(&self, url: &str) -> Result<bool, PoolError> {
        let url = RelayUrl::new(url);
        self.request(|reply| PoolCommand::RemoveRelay { url, reply })
            .await
    }

    /// Current state of every relay.
    pub async fn relay_states(&self) -> Result<Vec<RelayStatus>, PoolError> {
        self.request(|reply| PoolCommand::RelayStates { reply })
            .await
    }

    /// Id of the most recent event forwarded to the reconciler.
    pub fn last_event_id(&self) -> Option<EventId> {
        *self.last_event.borrow()
    }

    /// Receiver that changes whenever a new event is forwarded.
    pub fn watch_last_event(&self) -> watch::Receiver<Option<EventId>> {
        self.last_event.clone()
    }

    /// Ingest counters.
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Wait until at least one relay is open. Returns `false` on timeout.
    pub async fn wait_for_open(&self, timeout: Duration) -> bool {
        let mut open = self.open_relays.clone();
        tokio::time::timeout(timeout, open.wait_for(|n| *n > 0))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// Close every connection and stop the coordinator.
    ///
    /// Publishes still waiting for an answer fail with [`PoolError::Shutdown`].
    pub async fn shutdown(self) {
        let _ = self
            .request(|reply| PoolCommand::Shutdown { reply })
            .await;
        let _ = self.task.await;
    }
}

struct RelaySlot {
    handle: ConnectionHandle,
    state: ConnectionState,
}

struct PendingSend {
    waiting: BTreeSet<RelayUrl>,
    attempted: usize,
    rejections: Vec<(RelayUrl, String)>,
    outcome: Option<SendOutcome>,
    replies: Vec<Reply<Result<SendOutcome, PoolError>>>,
}

struct PoolActor<C: Connector> {
    connector: C,
    connection_config: ConnectionConfig,
    registry: SubscriptionRegistry,
    seen: SeenIds,
    verifier: Arc<dyn Verifier>,
    connections: BTreeMap<RelayUrl, RelaySlot>,
    sends: HashMap<EventId, PendingSend>,
    events: mpsc::Sender<Event>,
    last_event: watch::Sender<Option<EventId>>,
    open_relays: watch::Sender<usize>,
    stats: Arc<PoolStats>,
    commands: mpsc::Receiver<PoolCommand>,
    reports_tx: Option<mpsc::Sender<ConnectionReport>>,
    reports_rx: mpsc::Receiver<ConnectionReport>,
}

impl<C: Connector> PoolActor<C> {
    async fn run(mut self) {
        tracing::debug!(
            "Relay pool started with {} relays, dedup window {}",
            self.connections.len(),
            self.seen.capacity()
        );
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(PoolCommand::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(report) = self.reports_rx.recv() => self.handle_report(report).await,
            }
        }
        tracing::debug!("Relay pool stopped");
    }

    async fn handle_command(&mut self, command: PoolCommand) {
        match command {
            PoolCommand::Subscribe {
                channel,
                filters,
                reply,
            } => {
                tracing::debug!("Subscribing {} with {} filters", channel, filters.len());
                let replacing = self.registry.get(&channel).is_some();
                let affected = self.registry.upsert(channel.clone(), filters.clone());
                for relay in affected {
                    // Close-then-open per relay; commands are processed in order
                    if replacing {
                        self.command_if_open(
                            &relay,
                            ConnectionCommand::Unsubscribe {
                                channel: channel.clone(),
                            },
                        );
                    }
                    self.command_if_open(
                        &relay,
                        ConnectionCommand::Subscribe {
                            channel: channel.clone(),
                            filters: filters.clone(),
                        },
                    );
                }
                let _ = reply.send(());
            }
            PoolCommand::Unsubscribe { channel, reply } => {
                for relay in self.registry.remove(&channel) {
                    self.command_if_open(
                        &relay,
                        ConnectionCommand::Unsubscribe {
                            channel: channel.clone(),
                        },
                    );
                }
                let _ = reply.send(());
            }
            PoolCommand::UnsubscribeAll { reply } => {
                for (channel, relays) in self.registry.remove_all() {
                    tracing::debug!("Unsubscribing {}", channel);
                    for relay in relays {
                        self.command_if_open(
                            &relay,
                            ConnectionCommand::Unsubscribe {
                                channel: channel.clone(),
                            },
                        );
                    }
                }
                let _ = reply.send(());
            }
            PoolCommand::Send { event, reply } => self.send_event(event, reply),
            PoolCommand::AddRelay { url, reply } => {
                self.add_relay(url);
                let _ = reply.send(());
            }
            PoolCommand::RemoveRelay { url, reply } => {
                let _ = reply.send(self.remove_relay(&url));
            }
            PoolCommand::RelayStates { reply } => {
                let states = self
                    .connections
                    .iter()
                    .map(|(url, slot)| RelayStatus {
                        url: url.clone(),
                        state: slot.state.clone(),
                    })
                    .collect();
                let _ = reply.send(states);
            }
            // Handled by the run loop
            PoolCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn command_if_open(&self, relay: &RelayUrl, command: ConnectionCommand) {
        if let Some(slot) = self.connections.get(relay) {
            if slot.state.is_open() {
                slot.handle.send(command);
            }
        }
    }

    fn add_relay(&mut self, url: RelayUrl) {
        let Some(reports) = self.reports_tx.clone() else {
            return;
        };
        if self.connections.contains_key(&url) {
            return;
        }
        tracing::info!("Adding relay {}", url);
        // Subscriptions are replayed once the connection reports open
        self.registry.add_relay(url.clone());
        let transport = self.connector.transport(&url);
        let handle = connection::spawn(url.clone(), transport, &self.connection_config, reports);
        self.connections.insert(
            url,
            RelaySlot {
                handle,
                state: ConnectionState::Connecting { attempt: 0 },
            },
        );
    }

    fn remove_relay(&mut self, url: &RelayUrl) -> bool {
        self.registry.remove_relay(url);
        let Some(slot) = self.connections.remove(url) else {
            return false;
        };
        tracing::info!("Removing relay {}", url);
        slot.handle.send(ConnectionCommand::Shutdown);
        self.update_open_count();

        let ids: Vec<EventId> = self
            .sends
            .iter()
            .filter(|(_, send)| send.waiting.contains(url))
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.record_publish(url, id, false, "relay removed".into());
        }
        true
    }

    fn send_event(&mut self, event: Event, reply: Reply<Result<SendOutcome, PoolError>>) {
        if let Some(pending) = self.sends.get_mut(&event.id) {
            match &pending.outcome {
                Some(outcome) => {
                    let _ = reply.send(Ok(outcome.clone()));
                }
                None => pending.replies.push(reply),
            }
            return;
        }

        let open: BTreeSet<RelayUrl> = self
            .connections
            .iter()
            .filter(|(_, slot)| slot.state.is_open())
            .map(|(url, _)| url.clone())
            .collect();
        if open.is_empty() {
            tracing::warn!("Cannot publish {}: no relay is open", event.id);
            let _ = reply.send(Err(PoolError::NoRelayAccepted {
                attempted: 0,
                rejections: Vec::new(),
            }));
            return;
        }

        tracing::debug!("Publishing {} to {} relays", event.id, open.len());
        for relay in &open {
            self.command_if_open(relay, ConnectionCommand::Publish(event.clone()));
        }
        self.sends.insert(
            event.id,
            PendingSend {
                attempted: open.len(),
                waiting: open,
                rejections: Vec::new(),
                outcome: None,
                replies: vec![reply],
            },
        );
    }

    fn record_publish(&mut self, relay: &RelayUrl, event_id: EventId, accepted: bool, message: String) {
        let Some(pending) = self.sends.get_mut(&event_id) else {
            return;
        };
        if !pending.waiting.remove(relay) {
            return;
        }

        if accepted {
            if pending.outcome.is_none() {
                tracing::debug!("{} accepted {}", relay, event_id);
                let outcome = SendOutcome {
                    event_id,
                    relay: relay.clone(),
                    message,
                };
                for reply in pending.replies.drain(..) {
                    let _ = reply.send(Ok(outcome.clone()));
                }
                pending.outcome = Some(outcome);
            }
        } else {
            tracing::warn!("{} rejected {}: {}", relay, event_id, message);
            pending.rejections.push((relay.clone(), message));
        }

        if pending.waiting.is_empty() {
            if let Some(done) = self.sends.remove(&event_id) {
                if done.outcome.is_none() {
                    let attempted = done.attempted;
                    for reply in done.replies {
                        let _ = reply.send(Err(PoolError::NoRelayAccepted {
                            attempted,
                            rejections: done.rejections.clone(),
                        }));
                    }
                }
            }
        }
    }

    async fn handle_report(&mut self, report: ConnectionReport) {
        match report {
            ConnectionReport::State {
                relay,
                state,
                notice,
            } => {
                let Some(slot) = self.connections.get_mut(&relay) else {
                    return;
                };
                slot.state = state;
                if notice == ConnectionNotice::Opened {
                    let replay = self.registry.filters_for(&relay);
                    if !replay.is_empty() {
                        tracing::debug!("Replaying {} subscriptions on {}", replay.len(), relay);
                    }
                    for (channel, filters) in replay {
                        slot.handle
                            .send(ConnectionCommand::Subscribe { channel, filters });
                    }
                }
                self.update_open_count();
            }
            ConnectionReport::Event {
                relay,
                channel,
                event,
            } => self.ingest(&relay, &channel, *event).await,
            ConnectionReport::Eose { relay, channel } => {
                tracing::debug!("{} finished stored events for {}", relay, channel);
            }
            ConnectionReport::PublishResult {
                relay,
                event_id,
                accepted,
                message,
            } => self.record_publish(&relay, event_id, accepted, message),
        }
    }

    async fn ingest(&mut self, relay: &RelayUrl, channel: &str, event: Event) {
        PoolStats::bump(&self.stats.received);

        if !self.registry.matches(channel, &event) {
            PoolStats::bump(&self.stats.filtered);
            tracing::debug!(
                "Dropping {} from {}: does not match channel {}",
                event.id,
                relay,
                channel
            );
            return;
        }
        if self.seen.contains(&event.id) {
            PoolStats::bump(&self.stats.duplicates);
            return;
        }
        // Verify before remembering, so a forged copy cannot shadow the real one
        if !self.verifier.verify(&event) {
            PoolStats::bump(&self.stats.invalid);
            tracing::warn!("Dropping {} from {}: bad id or signature", event.id, relay);
            return;
        }

        self.seen.insert(event.id);
        self.last_event.send_replace(Some(event.id));
        PoolStats::bump(&self.stats.accepted);
        if self.events.send(event).await.is_err() {
            tracing::debug!("Event consumer is gone; dropping event");
        }
    }

    fn update_open_count(&self) {
        let open = self
            .connections
            .values()
            .filter(|slot| slot.state.is_open())
            .count();
        self.open_relays.send_replace(open);
    }

    async fn shutdown(&mut self) {
        tracing::debug!("Shutting down {} relay connections", self.connections.len());
        for slot in self.connections.values() {
            slot.handle.send(ConnectionCommand::Shutdown);
        }

        // Reports close once every connection task has exited
        self.reports_tx = None;
        while let Some(report) = self.reports_rx.recv().await {
            if let ConnectionReport::PublishResult {
                relay,
                event_id,
                accepted,
                message,
            } = report
            {
                self.record_publish(&relay, event_id, accepted, message);
            }
        }

        for (_, slot) in std::mem::take(&mut self.connections) {
            let _ = slot.handle.task.await;
        }
        self.update_open_count();

        for (_, pending) in self.sends.drain() {
            for reply in pending.replies {
                let _ = reply.send(Err(PoolError::Shutdown));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::keys::{Keys, SchnorrVerifier, Signer};
    use crate::transport::{MockConnector, MockTransport, Transport};
    use nostr_sync_types::{ClientMessage, EventDraft, Kind, RelayMessage};

    const WAIT: Duration = Duration::from_secs(2);
    const CHANNEL: &str = "main-channel";

    struct Harness {
        pool: RelayPool,
        relays: Vec<MockTransport>,
        events: mpsc::Receiver<Event>,
    }

    fn test_config(urls: &[String]) -> ClientConfig {
        let mut config = ClientConfig::default().with_relays(urls.iter().cloned());
        config.connection = ConnectionConfig {
            backoff_initial_ms: 10,
            backoff_jitter_ms: 0,
            ..ConnectionConfig::default()
        };
        config
    }

    async fn harness(n: usize) -> Harness {
        let connector = MockConnector::new();
        let urls: Vec<String> = (1..=n).map(|i| format!("wss://relay{}.test", i)).collect();
        let relays = urls.iter().map(|u| connector.relay(u.as_str())).collect();
        let (tx, rx) = mpsc::channel(16);
        let pool =
            RelayPool::start(&test_config(&urls), connector, Arc::new(SchnorrVerifier), tx).unwrap();
        wait_all_open(&pool, n).await;
        Harness {
            pool,
            relays,
            events: rx,
        }
    }

    async fn wait_all_open(pool: &RelayPool, n: usize) {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let states = pool.relay_states().await.unwrap();
            if states.len() == n && states.iter().all(|s| s.state.is_open()) {
                return;
            }
            assert!(tokio::time::Instant::now() < deadline, "relays never opened");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn metadata(keys: &Keys, name: &str, created_at: u64) -> Event {
        let draft = EventDraft::new(
            keys.public_key(),
            Kind::METADATA,
            format!(r#"{{"name":"{}"}}"#, name),
        )
        .with_created_at(created_at);
        keys.sign(draft).unwrap()
    }

    fn deliver(relay: &MockTransport, channel: &str, event: &Event) {
        relay.push_message(&RelayMessage::Event {
            channel: channel.into(),
            event: Box::new(event.clone()),
        });
    }

    fn is_req(m: &ClientMessage) -> bool {
        matches!(m, ClientMessage::Req { .. })
    }

    async fn next_event(rx: &mut mpsc::Receiver<Event>) -> Event {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn assert_no_event(rx: &mut mpsc::Receiver<Event>) {
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err(),
            "unexpected event delivered"
        );
    }

    // ===========================================
    // Subscriptions
    // ===========================================

    #[tokio::test]
    async fn subscribe_reaches_every_relay() {
        let h = harness(3).await;
        h.pool
            .subscribe(CHANNEL, Filter::new().kind(Kind::METADATA))
            .await
            .unwrap();

        for relay in &h.relays {
            let req = relay.wait_for_frame(WAIT, is_req).await;
            assert_eq!(
                req,
                Some(ClientMessage::Req {
                    channel: CHANNEL.into(),
                    filters: vec![Filter::new().kind(Kind::METADATA)],
                })
            );
        }
    }

    #[tokio::test]
    async fn resubscribe_replaces_filters() {
        let h = harness(1).await;
        let relay = &h.relays[0];
        h.pool
            .subscribe(CHANNEL, Filter::new().kind(Kind::METADATA))
            .await
            .unwrap();
        h.pool
            .subscribe(CHANNEL, Filter::new().kind(Kind::CONTACT_LIST))
            .await
            .unwrap();

        let latest = ClientMessage::Req {
            channel: CHANNEL.into(),
            filters: vec![Filter::new().kind(Kind::CONTACT_LIST)],
        };
        relay.wait_for_frame(WAIT, |m| *m == latest).await.unwrap();

        // The old subscription is closed before the new one opens
        let frames: Vec<ClientMessage> = relay
            .sent_messages()
            .into_iter()
            .filter(|m| is_req(m) || matches!(m, ClientMessage::Close { .. }))
            .collect();
        assert_eq!(
            frames,
            vec![
                ClientMessage::Req {
                    channel: CHANNEL.into(),
                    filters: vec![Filter::new().kind(Kind::METADATA)],
                },
                ClientMessage::Close {
                    channel: CHANNEL.into(),
                },
                latest.clone(),
            ]
        );

        // After a reconnect only the newest filter set is replayed
        relay.clear_sent();
        relay.drop_connection();
        relay.wait_for_frame(WAIT, is_req).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let reqs: Vec<ClientMessage> = relay.sent_messages().into_iter().filter(is_req).collect();
        assert_eq!(reqs, vec![latest]);
    }

    #[tokio::test]
    async fn reconnect_is_transparent() {
        let keys = Keys::generate().unwrap();
        let mut h = harness(1).await;
        let relay = h.relays[0].clone();
        h.pool
            .subscribe(CHANNEL, Filter::new().kind(Kind::METADATA))
            .await
            .unwrap();
        relay.wait_for_frame(WAIT, is_req).await.unwrap();

        relay.clear_sent();
        relay.drop_connection();
        relay.wait_for_frame(WAIT, is_req).await.unwrap();
        assert_eq!(relay.connect_count(), 2);

        let event = metadata(&keys, "after", 10);
        deliver(&relay, CHANNEL, &event);
        assert_eq!(next_event(&mut h.events).await, event);
    }

    #[tokio::test]
    async fn unsubscribe_sends_close() {
        let h = harness(2).await;
        h.pool.subscribe("a", Filter::new()).await.unwrap();
        h.pool.subscribe("b", Filter::new()).await.unwrap();
        h.pool.unsubscribe("a").await.unwrap();

        for relay in &h.relays {
            let close = relay
                .wait_for_frame(WAIT, |m| matches!(m, ClientMessage::Close { .. }))
                .await;
            assert_eq!(close, Some(ClientMessage::Close { channel: "a".into() }));
        }
    }

    #[tokio::test]
    async fn unsubscribe_all_closes_every_channel() {
        let h = harness(1).await;
        let relay = &h.relays[0];
        h.pool.subscribe("a", Filter::new()).await.unwrap();
        h.pool.subscribe("b", Filter::new()).await.unwrap();
        h.pool.unsubscribe_all().await.unwrap();

        relay
            .wait_for_frame(WAIT, |m| *m == ClientMessage::Close { channel: "b".into() })
            .await
            .unwrap();
        assert!(relay
            .sent_messages()
            .contains(&ClientMessage::Close { channel: "a".into() }));

        // Nothing is replayed after a reconnect
        relay.clear_sent();
        relay.drop_connection();
        let deadline = tokio::time::Instant::now() + WAIT;
        while relay.connect_count() < 2 {
            assert!(tokio::time::Instant::now() < deadline, "never reconnected");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(relay.sent_messages().iter().all(|m| !is_req(m)));
    }

    // ===========================================
    // Ingest
    // ===========================================

    #[tokio::test]
    async fn duplicate_event_is_delivered_once() {
        let keys = Keys::generate().unwrap();
        let mut h = harness(3).await;
        h.pool
            .subscribe(CHANNEL, Filter::new().kind(Kind::METADATA))
            .await
            .unwrap();

        let event = metadata(&keys, "alice", 100);
        for relay in &h.relays {
            deliver(relay, CHANNEL, &event);
        }

        assert_eq!(next_event(&mut h.events).await, event);
        assert_no_event(&mut h.events).await;
        assert_eq!(h.pool.stats().duplicates.load(Ordering::Relaxed), 2);
        assert_eq!(h.pool.stats().accepted.load(Ordering::Relaxed), 1);
        assert_eq!(h.pool.last_event_id(), Some(event.id));
    }

    #[tokio::test]
    async fn events_outside_channel_filters_are_dropped() {
        let keys = Keys::generate().unwrap();
        let mut h = harness(1).await;
        h.pool
            .subscribe(CHANNEL, Filter::new().kind(Kind::CONTACT_LIST))
            .await
            .unwrap();

        deliver(&h.relays[0], CHANNEL, &metadata(&keys, "x", 1));
        deliver(&h.relays[0], "unknown", &metadata(&keys, "y", 1));

        assert_no_event(&mut h.events).await;
        assert_eq!(h.pool.stats().filtered.load(Ordering::Relaxed), 2);
        assert_eq!(h.pool.last_event_id(), None);
    }

    #[tokio::test]
    async fn forged_copy_does_not_shadow_real_event() {
        let keys = Keys::generate().unwrap();
        let mut h = harness(2).await;
        h.pool
            .subscribe(CHANNEL, Filter::new().kind(Kind::METADATA))
            .await
            .unwrap();

        let event = metadata(&keys, "real", 5);
        let mut forged = event.clone();
        forged.sig = "00".repeat(64);

        deliver(&h.relays[0], CHANNEL, &forged);
        tokio::time::sleep(Duration::from_millis(50)).await;
        deliver(&h.relays[1], CHANNEL, &event);

        assert_eq!(next_event(&mut h.events).await, event);
        assert_eq!(h.pool.stats().invalid.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn last_event_watch_advances() {
        let keys = Keys::generate().unwrap();
        let mut h = harness(1).await;
        let mut watch = h.pool.watch_last_event();
        h.pool
            .subscribe(CHANNEL, Filter::new().kind(Kind::METADATA))
            .await
            .unwrap();

        let event = metadata(&keys, "a", 1);
        deliver(&h.relays[0], CHANNEL, &event);
        next_event(&mut h.events).await;

        tokio::time::timeout(WAIT, watch.wait_for(|id| *id == Some(event.id)))
            .await
            .unwrap()
            .unwrap();
    }

    // ===========================================
    // Publishing
    // ===========================================

    #[tokio::test]
    async fn one_acceptance_is_enough() {
        let keys = Keys::generate().unwrap();
        let h = harness(3).await;
        h.relays[0].respond_to_events(false, "blocked: spam");
        h.relays[1].respond_to_events(false, "error: full");
        h.relays[2].respond_to_events(true, "");

        let event = metadata(&keys, "me", 1);
        let outcome = h.pool.send_event(event.clone()).await.unwrap();

        assert_eq!(outcome.event_id, event.id);
        assert_eq!(outcome.relay, RelayUrl::new("wss://relay3.test"));
    }

    #[tokio::test]
    async fn zero_acceptances_fail_with_every_reason() {
        let keys = Keys::generate().unwrap();
        let h = harness(3).await;
        for relay in &h.relays {
            relay.respond_to_events(false, "blocked");
        }

        let err = h
            .pool
            .send_event(metadata(&keys, "me", 1))
            .await
            .unwrap_err();

        match err {
            PoolError::NoRelayAccepted {
                attempted,
                rejections,
            } => {
                assert_eq!(attempted, 3);
                assert_eq!(rejections.len(), 3);
                assert!(rejections.iter().all(|(_, msg)| msg == "blocked"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_without_open_relays_fails_immediately() {
        let keys = Keys::generate().unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let pool = RelayPool::start(
            &ClientConfig::default(),
            MockConnector::new(),
            Arc::new(SchnorrVerifier),
            tx,
        )
        .unwrap();

        let err = pool.send_event(metadata(&keys, "me", 1)).await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::NoRelayAccepted { attempted: 0, .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_duplicate_sends_share_the_outcome() {
        let keys = Keys::generate().unwrap();
        let h = harness(1).await;
        let event = metadata(&keys, "me", 1);

        let (a, b, ()) = tokio::join!(
            h.pool.send_event(event.clone()),
            h.pool.send_event(event.clone()),
            async {
                h.relays[0]
                    .wait_for_frame(WAIT, |m| matches!(m, ClientMessage::Event(_)))
                    .await;
                h.relays[0].push_message(&RelayMessage::Ok {
                    event_id: event.id,
                    accepted: true,
                    message: String::new(),
                });
            }
        );

        assert_eq!(a.unwrap(), b.unwrap());
        let events_sent = h.relays[0]
            .sent_messages()
            .into_iter()
            .filter(|m| matches!(m, ClientMessage::Event(_)))
            .count();
        assert_eq!(events_sent, 1);
    }

    // ===========================================
    // Relay management
    // ===========================================

    #[tokio::test]
    async fn invalid_relay_urls_are_refused() {
        assert!(matches!(
            parse_relay_url("https://relay.example"),
            Err(PoolError::InvalidRelayUrl { .. })
        ));
        assert!(parse_relay_url("not a url").is_err());
        assert_eq!(
            parse_relay_url("wss://relay.example/").unwrap(),
            RelayUrl::new("wss://relay.example")
        );

        let (tx, _rx) = mpsc::channel(1);
        let mut config = ClientConfig::default();
        config.relays = vec!["ftp://nope".into()];
        assert!(RelayPool::start(&config, MockConnector::new(), Arc::new(SchnorrVerifier), tx).is_err());
    }

    #[tokio::test]
    async fn added_relay_receives_existing_subscriptions() {
        let connector = MockConnector::new();
        let (tx, _rx) = mpsc::channel(1);
        let pool = RelayPool::start(
            &test_config(&[]),
            connector.clone(),
            Arc::new(SchnorrVerifier),
            tx,
        )
        .unwrap();
        pool.subscribe(CHANNEL, Filter::new().kind(Kind::METADATA))
            .await
            .unwrap();

        let late = connector.relay("wss://late.test");
        pool.add_relay("wss://late.test").await.unwrap();

        assert!(late.wait_for_frame(WAIT, is_req).await.is_some());
        assert!(pool.wait_for_open(WAIT).await);

        assert!(pool.remove_relay("wss://late.test").await.unwrap());
        assert!(pool.relay_states().await.unwrap().is_empty());
        assert!(!pool.remove_relay("wss://late.test").await.unwrap());
    }

    #[tokio::test]
    async fn shutdown_stops_pool() {
        let h = harness(2).await;
        let pool = h.pool;
        let relays = h.relays;

        tokio::time::timeout(WAIT, pool.shutdown()).await.unwrap();
        assert!(relays.iter().all(|r| !r.is_connected()));
    }
}
