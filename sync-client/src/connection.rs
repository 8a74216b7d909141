//! One task per relay: owns the transport, drives the connection state
//! machine and reports everything it sees to the pool.
//!
//! The task never remembers subscriptions. When it (re)opens it reports
//! [`ConnectionNotice::Opened`] and the pool replays the registry for this
//! relay. Publishes go through an [`OutboundBuffer`] so they survive
//! reconnects and fail loudly on overflow or timeout.

use crate::config::ConnectionConfig;
use crate::transport::{Transport, TransportError};
use nostr_sync_core::{
    Action, Backoff, ConnectionEvent, ConnectionNotice, ConnectionState, OutboundBuffer,
    QueuedEvent,
};
use nostr_sync_types::{ClientMessage, Event, EventId, Filter, RelayMessage, RelayUrl};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Commands from the pool to one connection.
#[derive(Debug, Clone)]
pub(crate) enum ConnectionCommand {
    /// Send a REQ if open; dropped otherwise (replayed on open).
    Subscribe {
        channel: String,
        filters: Vec<Filter>,
    },
    /// Send a CLOSE if open.
    Unsubscribe { channel: String },
    /// Publish an event, buffering while not open.
    Publish(Event),
    /// Close for good.
    Shutdown,
}

/// What a connection tells the pool.
#[derive(Debug, Clone)]
pub(crate) enum ConnectionReport {
    /// Lifecycle change.
    State {
        relay: RelayUrl,
        state: ConnectionState,
        notice: ConnectionNotice,
    },
    /// An EVENT frame for a channel.
    Event {
        relay: RelayUrl,
        channel: String,
        event: Box<Event>,
    },
    /// End of stored events for a channel.
    Eose { relay: RelayUrl, channel: String },
    /// Final outcome of one publish on this relay.
    PublishResult {
        relay: RelayUrl,
        event_id: EventId,
        accepted: bool,
        message: String,
    },
}

/// Pool-side handle to a running connection task.
#[derive(Debug)]
pub(crate) struct ConnectionHandle {
    pub commands: mpsc::UnboundedSender<ConnectionCommand>,
    pub task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Queue a command. Fails only if the task has finished.
    pub fn send(&self, command: ConnectionCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

/// Start the task for `relay`.
pub(crate) fn spawn<T: Transport>(
    relay: RelayUrl,
    transport: T,
    config: &ConnectionConfig,
    reports: mpsc::Sender<ConnectionReport>,
) -> ConnectionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let connection = RelayConnection::new(relay, transport, config, rx, reports);
    ConnectionHandle {
        commands: tx,
        task: tokio::spawn(connection.run()),
    }
}

struct RelayConnection<T: Transport> {
    relay: RelayUrl,
    transport: T,
    state: ConnectionState,
    outbox: OutboundBuffer,
    backoff: Backoff,
    connect_timeout: Duration,
    ok_timeout: Duration,
    reconnect_at: Option<Instant>,
    commands: mpsc::UnboundedReceiver<ConnectionCommand>,
    reports: mpsc::Sender<ConnectionReport>,
}

impl<T: Transport> RelayConnection<T> {
    fn new(
        relay: RelayUrl,
        transport: T,
        config: &ConnectionConfig,
        commands: mpsc::UnboundedReceiver<ConnectionCommand>,
        reports: mpsc::Sender<ConnectionReport>,
    ) -> Self {
        Self {
            relay,
            transport,
            state: ConnectionState::new(),
            outbox: OutboundBuffer::new(config.outbox_capacity),
            backoff: config.backoff(),
            connect_timeout: config.connect_timeout(),
            ok_timeout: config.ok_timeout(),
            reconnect_at: None,
            commands,
            reports,
        }
    }

    async fn run(mut self) {
        tracing::debug!("Starting connection to {}", self.relay);
        self.dispatch(ConnectionEvent::ConnectRequested).await;

        let mut expiry = tokio::time::interval((self.ok_timeout / 4).max(Duration::from_millis(50)));
        expiry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            match self.state {
                ConnectionState::Open => {
                    tokio::select! {
                        frame = self.transport.recv() => match frame {
                            Ok(Some(text)) => self.handle_frame(&text).await,
                            Ok(None) => {
                                self.dispatch(ConnectionEvent::Dropped {
                                    reason: "closed by relay".into(),
                                })
                                .await
                            }
                            Err(e) => {
                                self.dispatch(ConnectionEvent::Dropped {
                                    reason: e.to_string(),
                                })
                                .await
                            }
                        },
                        command = self.commands.recv() => self.handle_command(command).await,
                        _ = expiry.tick() => self.expire_publishes().await,
                    }
                }
                ConnectionState::Errored { .. } => {
                    let wake = self.reconnect_at.unwrap_or_else(Instant::now);
                    tokio::select! {
                        _ = tokio::time::sleep_until(wake) => {
                            self.reconnect_at = None;
                            self.dispatch(ConnectionEvent::ReconnectTimer).await;
                        }
                        command = self.commands.recv() => self.handle_command(command).await,
                        _ = expiry.tick() => self.expire_publishes().await,
                    }
                }
                _ => break,
            }
        }

        tracing::debug!("Connection to {} finished", self.relay);
    }

    /// Feed an event to the state machine and execute the resulting actions,
    /// including any follow-up events they produce.
    async fn dispatch(&mut self, event: ConnectionEvent) {
        let mut events = VecDeque::from([event]);
        while let Some(event) = events.pop_front() {
            let (state, actions) = self.state.clone().on_event(event);
            if state != self.state {
                tracing::debug!(
                    "Relay {} {} -> {}",
                    self.relay,
                    self.state.label(),
                    state.label()
                );
            }
            self.state = state;
            for action in actions {
                if let Some(next) = self.execute(action).await {
                    events.push_back(next);
                }
            }
        }
    }

    async fn execute(&mut self, action: Action) -> Option<ConnectionEvent> {
        match action {
            Action::Connect => {
                let attempt = tokio::time::timeout(
                    self.connect_timeout,
                    self.transport.connect(&self.relay),
                )
                .await;
                Some(match attempt {
                    Ok(Ok(())) => ConnectionEvent::ConnectSucceeded,
                    Ok(Err(e)) => ConnectionEvent::ConnectFailed {
                        error: e.to_string(),
                    },
                    Err(_) => ConnectionEvent::ConnectTimedOut,
                })
            }
            Action::Disconnect => {
                if let Err(e) = self.transport.close().await {
                    tracing::debug!("Close of {} failed: {}", self.relay, e);
                }
                Some(ConnectionEvent::Closed)
            }
            Action::FlushOutbox => self.flush_outbox().await,
            Action::RequeuePending => {
                self.outbox.requeue_pending();
                None
            }
            Action::FailOutbox { reason } => {
                for entry in self.outbox.drain_all() {
                    self.report_publish(entry.id(), false, reason.clone()).await;
                }
                None
            }
            Action::ScheduleReconnect { attempt } => {
                let delay = self.backoff.delay(attempt);
                tracing::debug!(
                    "Reconnecting to {} in {:?} (attempt {})",
                    self.relay,
                    delay,
                    attempt
                );
                self.reconnect_at = Some(Instant::now() + delay);
                None
            }
            Action::CancelReconnect => {
                self.reconnect_at = None;
                None
            }
            Action::Notify(notice) => {
                match &notice {
                    ConnectionNotice::Opened => tracing::info!("Connected to {}", self.relay),
                    ConnectionNotice::ConnectFailed { error, attempt } => tracing::warn!(
                        "Connect to {} failed (attempt {}): {}",
                        self.relay,
                        attempt,
                        error
                    ),
                    ConnectionNotice::Dropped { reason } => {
                        tracing::warn!("Lost connection to {}: {}", self.relay, reason)
                    }
                    ConnectionNotice::Closed => tracing::debug!("Closed {}", self.relay),
                }
                self.report(ConnectionReport::State {
                    relay: self.relay.clone(),
                    state: self.state.clone(),
                    notice,
                })
                .await;
                None
            }
        }
    }

    async fn handle_command(&mut self, command: Option<ConnectionCommand>) {
        let Some(command) = command else {
            // Pool is gone
            self.dispatch(ConnectionEvent::CloseRequested).await;
            return;
        };

        match command {
            ConnectionCommand::Subscribe { channel, filters } => {
                if self.state.is_open() {
                    self.send_or_drop(ClientMessage::Req { channel, filters })
                        .await;
                }
            }
            ConnectionCommand::Unsubscribe { channel } => {
                if self.state.is_open() {
                    self.send_or_drop(ClientMessage::Close { channel }).await;
                }
            }
            ConnectionCommand::Publish(event) => {
                let entry = QueuedEvent::new(event, Instant::now().into_std());
                if let Some(evicted) = self.outbox.enqueue(entry) {
                    tracing::warn!(
                        "Outbox for {} full, dropping publish {}",
                        self.relay,
                        evicted.id()
                    );
                    self.report_publish(evicted.id(), false, "outbox full".into())
                        .await;
                }
                if self.state.is_open() {
                    if let Some(next) = self.flush_outbox().await {
                        self.dispatch(next).await;
                    }
                }
            }
            ConnectionCommand::Shutdown => {
                self.dispatch(ConnectionEvent::CloseRequested).await;
            }
        }
    }

    /// Write every queued publish. Returns `Dropped` if the transport failed.
    async fn flush_outbox(&mut self) -> Option<ConnectionEvent> {
        while let Some(event) = self.outbox.dequeue() {
            if let Err(e) = self.send(&ClientMessage::Event(event)).await {
                return Some(ConnectionEvent::Dropped {
                    reason: e.to_string(),
                });
            }
        }
        None
    }

    async fn send_or_drop(&mut self, message: ClientMessage) {
        if let Err(e) = self.send(&message).await {
            self.dispatch(ConnectionEvent::Dropped {
                reason: e.to_string(),
            })
            .await;
        }
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        let frame = match message.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Failed to encode frame for {}: {}", self.relay, e);
                return Ok(());
            }
        };
        self.transport.send(frame).await
    }

    async fn handle_frame(&mut self, text: &str) {
        let message = match RelayMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Skipping malformed frame from {}: {}", self.relay, e);
                return;
            }
        };

        let relay = self.relay.clone();
        match message {
            RelayMessage::Event { channel, event } => {
                self.report(ConnectionReport::Event {
                    relay,
                    channel,
                    event,
                })
                .await;
            }
            RelayMessage::Eose { channel } => {
                self.report(ConnectionReport::Eose { relay, channel }).await;
            }
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => {
                if self.outbox.ack(&event_id).is_some() {
                    self.report_publish(event_id, accepted, message).await;
                } else {
                    tracing::debug!("OK from {} for unknown event {}", relay, event_id);
                }
            }
            // Informational only; the registry replays subscriptions on reopen
            RelayMessage::Notice { message } => {
                tracing::info!("Notice from {}: {}", relay, message);
            }
            RelayMessage::Closed { channel, message } => {
                tracing::warn!("{} closed subscription {}: {}", relay, channel, message);
            }
        }
    }

    async fn expire_publishes(&mut self) {
        let now = Instant::now().into_std();
        for entry in self.outbox.expire(now, self.ok_timeout) {
            tracing::warn!("No OK from {} for {}", self.relay, entry.id());
            self.report_publish(entry.id(), false, "timed out waiting for OK".into())
                .await;
        }
    }

    async fn report_publish(&mut self, event_id: EventId, accepted: bool, message: String) {
        self.report(ConnectionReport::PublishResult {
            relay: self.relay.clone(),
            event_id,
            accepted,
            message,
        })
        .await;
    }

    async fn report(&mut self, report: ConnectionReport) {
        // A closed pool just means nobody is listening any more
        let _ = self.reports.send(report).await;
    }
}
