//! Relay connection state machine for nostr-sync.
//!
//! This module provides a pure, side-effect-free state machine for managing
//! the lifecycle of one relay connection. The state machine takes events as
//! input and produces a new state plus a list of actions to execute.
//!
//! The actual I/O (opening sockets, writing frames, sleeping) is performed by
//! sync-client, not by this module. This enables instant unit testing without
//! network mocks.
//!
//! ```text
//! Disconnected ──► Connecting ──► Open ──► Closing ──► Disconnected
//!                     │  ▲          │
//!                     ▼  │          ▼
//!                   Errored ◄───────┘   (reconnect with backoff)
//! ```

use std::time::Duration;

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to.
    Disconnected,
    /// Connection attempt in progress.
    Connecting {
        /// Failed attempts since the connection was last open.
        attempt: u32,
    },
    /// Socket is open; frames flow both ways.
    Open,
    /// Graceful close in progress.
    Closing,
    /// Connection failed or dropped; a reconnect is scheduled.
    Errored {
        /// Failed attempts since the connection was last open.
        attempt: u32,
    },
}

impl ConnectionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions in order.
    pub fn on_event(self, event: ConnectionEvent) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Disconnected
            (Self::Disconnected, ConnectionEvent::ConnectRequested) => {
                (Self::Connecting { attempt: 0 }, vec![Action::Connect])
            }

            // From Connecting
            (Self::Connecting { .. }, ConnectionEvent::ConnectSucceeded) => (
                Self::Open,
                vec![
                    Action::FlushOutbox,
                    Action::Notify(ConnectionNotice::Opened),
                ],
            ),
            (Self::Connecting { attempt }, ConnectionEvent::ConnectFailed { error }) => {
                Self::errored(attempt.saturating_add(1), error)
            }
            (Self::Connecting { attempt }, ConnectionEvent::ConnectTimedOut) => {
                Self::errored(attempt.saturating_add(1), "connect timed out".into())
            }
            (Self::Connecting { .. }, ConnectionEvent::CloseRequested) => Self::closed_now(),

            // From Open
            (Self::Open, ConnectionEvent::Dropped { reason }) => (
                Self::Errored { attempt: 1 },
                vec![
                    Action::RequeuePending,
                    Action::Notify(ConnectionNotice::Dropped { reason }),
                    Action::ScheduleReconnect { attempt: 1 },
                ],
            ),
            (Self::Open, ConnectionEvent::CloseRequested) => (Self::Closing, vec![Action::Disconnect]),

            // From Closing
            (Self::Closing, ConnectionEvent::Closed) => (
                Self::Disconnected,
                vec![
                    Action::FailOutbox {
                        reason: "connection closed".into(),
                    },
                    Action::Notify(ConnectionNotice::Closed),
                ],
            ),

            // From Errored
            (Self::Errored { attempt }, ConnectionEvent::ReconnectTimer) => {
                (Self::Connecting { attempt }, vec![Action::Connect])
            }
            (Self::Errored { .. }, ConnectionEvent::CloseRequested) => {
                let (state, mut actions) = Self::closed_now();
                actions.insert(0, Action::CancelReconnect);
                (state, actions)
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    fn errored(attempt: u32, error: String) -> (Self, Vec<Action>) {
        (
            Self::Errored { attempt },
            vec![
                Action::Notify(ConnectionNotice::ConnectFailed { error, attempt }),
                Action::ScheduleReconnect { attempt },
            ],
        )
    }

    fn closed_now() -> (Self, Vec<Action>) {
        (
            Self::Disconnected,
            vec![
                Action::FailOutbox {
                    reason: "connection closed".into(),
                },
                Action::Notify(ConnectionNotice::Closed),
            ],
        )
    }

    /// Check if frames can be written.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if currently trying to (re)connect.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting { .. } | Self::Errored { .. })
    }

    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting { .. } => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Errored { .. } => "errored",
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur in the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The pool wants this relay connected.
    ConnectRequested,
    /// Transport handshake succeeded.
    ConnectSucceeded,
    /// Transport handshake failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Transport handshake did not finish in time.
    ConnectTimedOut,
    /// An open connection was lost.
    Dropped {
        /// Reason for the drop.
        reason: String,
    },
    /// The pool wants this relay disconnected.
    CloseRequested,
    /// The transport finished closing.
    Closed,
    /// Reconnect timer fired.
    ReconnectTimer,
}

/// Actions to be executed by the sync-client connection task.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the transport.
    Connect,
    /// Close the transport.
    Disconnect,
    /// Write every queued publish.
    FlushOutbox,
    /// Move publishes awaiting OK back to the queue.
    RequeuePending,
    /// Fail every queued and pending publish.
    FailOutbox {
        /// Reported to the waiting callers.
        reason: String,
    },
    /// Sleep for the backoff delay of `attempt`, then fire `ReconnectTimer`.
    ScheduleReconnect {
        /// Attempt number fed to [`Backoff::delay`].
        attempt: u32,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Tell the pool something changed.
    Notify(ConnectionNotice),
}

/// Lifecycle notifications for the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionNotice {
    /// Frames can flow; registered subscriptions must be replayed.
    Opened,
    /// A connect attempt failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
        /// Which attempt this was.
        attempt: u32,
    },
    /// An open connection was lost.
    Dropped {
        /// Reason for the drop.
        reason: String,
    },
    /// The connection is shut down for good.
    Closed,
}

/// Exponential reconnect backoff with random jitter.
///
/// `delay(n) = min(max, initial * 2^(n-1)) + random(0..=jitter)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay for the first attempt.
    pub initial: Duration,
    /// Cap on the exponential part.
    pub max: Duration,
    /// Upper bound on added jitter.
    pub jitter: Duration,
}

impl Backoff {
    /// Create a backoff policy.
    pub fn new(initial: Duration, max: Duration, jitter: Duration) -> Self {
        Self {
            initial,
            max,
            jitter,
        }
    }

    /// Delay without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1).saturating_sub(1).min(20);
        self.initial
            .saturating_mul(1u32 << exponent)
            .min(self.max)
    }

    /// Delay with jitter, spreading reconnects after a relay restart.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay(attempt) + random_jitter(self.jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            Duration::from_secs(1),
        )
    }
}

fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return Duration::ZERO;
    }
    Duration::from_millis(u64::from_le_bytes(bytes) % (max_ms + 1))
}
