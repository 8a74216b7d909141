//! Bounded window of recently seen event ids.
//!
//! The same event usually arrives once per relay. The window keeps the
//! newest `capacity` ids; older ids are evicted first-in first-out, after
//! which a redelivery is treated as new again. That is harmless because
//! reconciliation is idempotent.

use nostr_sync_types::EventId;
use std::collections::{HashSet, VecDeque};

/// FIFO-bounded set of event ids.
#[derive(Debug, Clone)]
pub struct SeenIds {
    capacity: usize,
    order: VecDeque<EventId>,
    set: HashSet<EventId>,
}

impl SeenIds {
    /// Create a window remembering at most `capacity` ids.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            set: HashSet::with_capacity(capacity),
        }
    }

    /// Whether `id` is inside the window.
    pub fn contains(&self, id: &EventId) -> bool {
        self.set.contains(id)
    }

    /// Record `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: EventId) -> bool {
        if !self.set.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        true
    }

    /// Number of ids in the window.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Maximum number of ids remembered.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> EventId {
        EventId::from_bytes([n; 32])
    }

    #[test]
    fn second_insert_is_duplicate() {
        let mut seen = SeenIds::new(10);
        assert!(seen.insert(id(1)));
        assert!(!seen.insert(id(1)));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn oldest_is_evicted_first() {
        let mut seen = SeenIds::new(2);
        seen.insert(id(1));
        seen.insert(id(2));
        seen.insert(id(3));

        assert!(!seen.contains(&id(1)));
        assert!(seen.contains(&id(2)));
        assert!(seen.contains(&id(3)));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn evicted_id_counts_as_new_again() {
        let mut seen = SeenIds::new(1);
        seen.insert(id(1));
        seen.insert(id(2));
        assert!(seen.insert(id(1)));
    }

    #[test]
    fn duplicate_does_not_refresh_position() {
        let mut seen = SeenIds::new(2);
        seen.insert(id(1));
        seen.insert(id(2));
        seen.insert(id(1));
        seen.insert(id(3));

        assert!(!seen.contains(&id(1)));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut seen = SeenIds::new(0);
        assert_eq!(seen.capacity(), 1);
        assert!(seen.insert(id(1)));
        assert!(!seen.insert(id(1)));
    }
}
