//! Outbound publish buffer for one relay connection.
//!
//! This module provides a queue for outgoing EVENT publishes with:
//! - FIFO ordering for delivery
//! - Pending tracking (sent but no OK from the relay yet)
//! - A size bound with drop-oldest eviction that is always reported
//!
//! Publishes issued while the connection is not open wait in the queue and
//! are flushed on open. A drop moves pending publishes back to the queue so
//! they are re-sent after reconnect. Subscription frames never go through
//! here; the registry is replayed instead.

use nostr_sync_types::{Event, EventId};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// A publish waiting to be sent or acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    /// The signed event.
    pub event: Event,
    /// When the publish entered the buffer. Drives the OK timeout.
    pub queued_at: Instant,
}

impl QueuedEvent {
    /// Create a new queued publish.
    pub fn new(event: Event, queued_at: Instant) -> Self {
        Self { event, queued_at }
    }

    /// Id of the queued event.
    pub fn id(&self) -> EventId {
        self.event.id
    }
}

/// Publish buffer with pending tracking.
///
/// Publishes flow through the buffer in this order:
/// 1. `enqueue()` - add to the queue
/// 2. `dequeue()` - remove from queue, move to pending
/// 3. `ack()` - remove from pending (relay answered OK)
///
/// On connection loss call `requeue_pending()` so pending publishes go out
/// again after reconnect.
#[derive(Debug)]
pub struct OutboundBuffer {
    /// Maximum number of publishes (queued + pending).
    capacity: usize,
    /// Publishes waiting to be sent.
    queue: VecDeque<QueuedEvent>,
    /// Publishes sent but not yet acknowledged.
    pending: HashMap<EventId, QueuedEvent>,
}

impl OutboundBuffer {
    /// Create a new buffer holding at most `capacity` publishes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: VecDeque::new(),
            pending: HashMap::new(),
        }
    }

    /// Add a publish to the queue.
    ///
    /// When the buffer is full the oldest entry is evicted (queued first,
    /// then pending) and returned so the caller can report the failure.
    /// Enqueueing an id already in the buffer is a no-op.
    pub fn enqueue(&mut self, entry: QueuedEvent) -> Option<QueuedEvent> {
        if self.contains(&entry.id()) {
            return None;
        }

        let evicted = if self.total_count() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };
        self.queue.push_back(entry);
        evicted
    }

    fn evict_oldest(&mut self) -> Option<QueuedEvent> {
        if let Some(oldest) = self.queue.pop_front() {
            return Some(oldest);
        }
        let oldest_id = self
            .pending
            .values()
            .min_by_key(|e| e.queued_at)
            .map(QueuedEvent::id)?;
        self.pending.remove(&oldest_id)
    }

    /// Remove and return the next publish from the queue.
    ///
    /// The publish is moved to the pending set until acknowledged.
    pub fn dequeue(&mut self) -> Option<Event> {
        let entry = self.queue.pop_front()?;
        let event = entry.event.clone();
        self.pending.insert(entry.id(), entry);
        Some(event)
    }

    /// Acknowledge a publish (accepted or rejected, the relay answered).
    pub fn ack(&mut self, id: &EventId) -> Option<QueuedEvent> {
        if let Some(entry) = self.pending.remove(id) {
            return Some(entry);
        }
        let pos = self.queue.iter().position(|e| e.id() == *id)?;
        self.queue.remove(pos)
    }

    /// Move every pending publish back to the front of the queue, oldest first.
    pub fn requeue_pending(&mut self) {
        let mut pending: Vec<QueuedEvent> = self.pending.drain().map(|(_, e)| e).collect();
        pending.sort_by_key(|e| std::cmp::Reverse(e.queued_at));
        for entry in pending {
            self.queue.push_front(entry);
        }
    }

    /// Remove every publish that has waited at least `timeout` by `now`.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<QueuedEvent> {
        let is_expired = |e: &QueuedEvent| now.saturating_duration_since(e.queued_at) >= timeout;

        let mut expired: Vec<QueuedEvent> = Vec::new();
        let expired_ids: Vec<EventId> = self
            .pending
            .values()
            .filter(|e| is_expired(e))
            .map(QueuedEvent::id)
            .collect();
        for id in expired_ids {
            if let Some(entry) = self.pending.remove(&id) {
                expired.push(entry);
            }
        }

        let (old, keep): (VecDeque<QueuedEvent>, VecDeque<QueuedEvent>) =
            self.queue.drain(..).partition(|e| is_expired(e));
        self.queue = keep;
        expired.extend(old);
        expired
    }

    /// Remove and return everything, queued and pending.
    pub fn drain_all(&mut self) -> Vec<QueuedEvent> {
        let mut all: Vec<QueuedEvent> = self.queue.drain(..).collect();
        all.extend(self.pending.drain().map(|(_, e)| e));
        all
    }

    /// Whether `id` is queued or pending.
    pub fn contains(&self, id: &EventId) -> bool {
        self.pending.contains_key(id) || self.queue.iter().any(|e| e.id() == *id)
    }

    /// Check if a publish is pending (sent but not acknowledged).
    pub fn is_pending(&self, id: &EventId) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of queued publishes (not including pending).
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of pending publishes.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Total number of publishes (queued + pending).
    pub fn total_count(&self) -> usize {
        self.queue.len() + self.pending.len()
    }
}
