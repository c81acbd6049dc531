//! Bounded inbox of messages addressed to this node
//!
//! Diagnostics-only store: nothing here is ever re-disseminated. Entries are
//! deduplicated by message identity and the ring overwrites blindly once
//! full, mirroring the main store's cursor discipline without a policy.

use crate::message::Message;

/// Bounded, deduplicated ring of messages whose recipient is this node.
#[derive(Debug)]
pub struct Inbox {
    slots: Vec<Option<Message>>,
    head: usize,
}

impl Inbox {
    /// Create an empty inbox with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
        }
    }

    /// Slot capacity of the ring.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    /// Record a message unless an identical one (same sender, created_at,
    /// body) is already resident. Returns true when the message was stored.
    pub fn push(&mut self, message: Message) -> bool {
        if self.contains(&message) {
            return false;
        }
        let index = self.head;
        self.slots[index] = Some(message);
        self.head = (index + 1) % self.capacity();
        true
    }

    /// Duplicate check by message identity.
    pub fn contains(&self, message: &Message) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|resident| resident.same_payload(message))
    }

    /// Iterate resident entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.slots.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Body;
    use crate::peer::PeerId;

    fn message(tag: u64) -> Message {
        Message::new(
            PeerId(9026),
            PeerId(8600),
            1_700_000_000 + tag,
            Body::from_text(&format!("for-me-{tag}")),
        )
    }

    #[test]
    fn test_push_and_len() {
        let mut inbox = Inbox::new(4);
        assert!(inbox.is_empty());
        assert!(inbox.push(message(0)));
        assert!(inbox.push(message(1)));
        assert_eq!(inbox.len(), 2);
    }

    #[test]
    fn test_duplicate_push_is_idempotent() {
        let mut inbox = Inbox::new(4);
        assert!(inbox.push(message(0)));
        assert!(!inbox.push(message(0)));
        assert_eq!(inbox.len(), 1);

        // Differing recipient does not make it a new entry
        let mut relabeled = message(0);
        relabeled.recipient = PeerId(9999);
        assert!(!inbox.push(relabeled));
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn test_ring_overwrites_oldest_when_full() {
        let mut inbox = Inbox::new(2);
        inbox.push(message(0));
        inbox.push(message(1));
        inbox.push(message(2));

        assert_eq!(inbox.len(), 2);
        assert!(!inbox.contains(&message(0)));
        assert!(inbox.contains(&message(1)));
        assert!(inbox.contains(&message(2)));
    }
}
