//! Bounded circular message store with configurable overwrite policy
//!
//! The store is an array-backed ring of fixed capacity. The write cursor
//! always points at the next slot a push *may* occupy, not necessarily an
//! empty one; the policy decides which slot actually gets reclaimed. Slot
//! selection is a pure function so the eviction logic is testable without a
//! full push.

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Which slot a new message may overwrite when the ring has wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    /// Prefer slots that are empty or hold an already-transmitted message,
    /// scanning one full lap from the cursor; fall back to the cursor slot
    /// unconditionally so the writer never deadlocks. The fallback is a
    /// documented lossy escape valve, not a guarantee.
    #[default]
    SentOnly,
    /// Always overwrite the cursor slot.
    Blind,
}

/// Bounded ring of disseminated messages.
#[derive(Debug)]
pub struct MessageStore {
    slots: Vec<Option<Message>>,
    head: usize,
    policy: OverwritePolicy,
}

impl MessageStore {
    /// Create an empty store with `capacity` slots.
    pub fn new(capacity: usize, policy: OverwritePolicy) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            policy,
        }
    }

    /// Slot capacity of the ring.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Current write cursor.
    pub fn head(&self) -> usize {
        self.head
    }

    /// Configured overwrite policy.
    pub fn policy(&self) -> OverwritePolicy {
        self.policy
    }

    /// Number of resident messages.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// True when no message is resident.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    /// Pick the slot the next push will overwrite. Pure: does not mutate.
    pub fn next_write_slot(&self) -> usize {
        match self.policy {
            OverwritePolicy::Blind => self.head,
            OverwritePolicy::SentOnly => {
                let capacity = self.capacity();
                for offset in 0..capacity {
                    let index = (self.head + offset) % capacity;
                    match &self.slots[index] {
                        None => return index,
                        Some(message) if message.is_transmitted() => return index,
                        Some(_) => {}
                    }
                }
                // One full lap found nothing reclaimable: overwrite the
                // original cursor slot.
                self.head
            }
        }
    }

    /// Store a message, applying the overwrite policy, and advance the
    /// cursor past the written slot. Returns the slot index used.
    pub fn push(&mut self, message: Message) -> usize {
        let index = self.next_write_slot();
        self.slots[index] = Some(message);
        self.head = (index + 1) % self.capacity();
        index
    }

    /// Message at a slot, if the slot has ever been written.
    pub fn get(&self, index: usize) -> Option<&Message> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Iterate resident messages in slot order.
    pub fn iter_active(&self) -> impl Iterator<Item = (usize, &Message)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|m| (i, m)))
    }

    /// Duplicate check against all resident entries, in slot order.
    ///
    /// Scanning stops at the first never-written slot: before the ring wraps
    /// the occupied prefix is contiguous, and after it wraps there are no
    /// empty slots left.
    pub fn contains(&self, message: &Message) -> bool {
        for slot in &self.slots {
            match slot {
                Some(resident) if resident.same_payload(message) => return true,
                Some(_) => {}
                None => break,
            }
        }
        false
    }

    /// Set the peer's transmitted bit on a slot, but only if the slot still
    /// holds the message the caller encoded. Returns false when the slot was
    /// overwritten in the meantime.
    pub fn confirm_transmitted(
        &mut self,
        index: usize,
        encoded: &Message,
        peer_index: usize,
    ) -> bool {
        match self.slots.get_mut(index).and_then(Option::as_mut) {
            Some(resident) if resident.same_payload(encoded) => {
                resident.mark_sent_to(peer_index);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Body;
    use crate::peer::PeerId;

    fn message(tag: u64) -> Message {
        Message::new(
            PeerId(8001),
            PeerId(8600),
            1_700_000_000 + tag,
            Body::from_text(&format!("payload-{tag}")),
        )
    }

    #[test]
    fn test_push_fills_in_order() {
        let mut store = MessageStore::new(4, OverwritePolicy::SentOnly);
        assert_eq!(store.push(message(0)), 0);
        assert_eq!(store.push(message(1)), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.head(), 2);
    }

    #[test]
    fn test_capacity_invariant_under_both_policies() {
        for policy in [OverwritePolicy::SentOnly, OverwritePolicy::Blind] {
            let mut store = MessageStore::new(3, policy);
            for tag in 0..10 {
                store.push(message(tag));
            }
            assert_eq!(store.len(), 3);
        }
    }

    #[test]
    fn test_blind_policy_overwrites_cursor() {
        let mut store = MessageStore::new(3, OverwritePolicy::Blind);
        for tag in 0..3 {
            store.push(message(tag));
        }
        assert_eq!(store.head(), 0);
        assert_eq!(store.next_write_slot(), 0);

        store.push(message(3));
        assert!(store.get(0).unwrap().same_payload(&message(3)));
        assert_eq!(store.head(), 1);
    }

    #[test]
    fn test_sent_only_prefers_transmitted_slot() {
        // Full ring A, B, C with only B transmitted: the next push must land
        // on B's slot.
        let mut store = MessageStore::new(3, OverwritePolicy::SentOnly);
        for tag in 0..3 {
            store.push(message(tag));
        }
        assert_eq!(store.head(), 0);

        let b = store.get(1).unwrap().clone();
        assert!(store.confirm_transmitted(1, &b, 0));

        assert_eq!(store.next_write_slot(), 1);
        let slot = store.push(message(9));
        assert_eq!(slot, 1);
        assert!(store.get(0).unwrap().same_payload(&message(0)));
        assert!(store.get(1).unwrap().same_payload(&message(9)));
        assert!(store.get(2).unwrap().same_payload(&message(2)));
        assert_eq!(store.head(), 2);
    }

    #[test]
    fn test_sent_only_falls_back_to_cursor_when_full() {
        let mut store = MessageStore::new(3, OverwritePolicy::SentOnly);
        for tag in 0..3 {
            store.push(message(tag));
        }
        // Nothing transmitted, nothing empty: last resort is the cursor.
        assert_eq!(store.next_write_slot(), store.head());

        let head = store.head();
        let slot = store.push(message(7));
        assert_eq!(slot, head);
    }

    #[test]
    fn test_sent_only_wraps_scan_before_cursor() {
        let mut store = MessageStore::new(4, OverwritePolicy::SentOnly);
        for tag in 0..4 {
            store.push(message(tag));
        }
        // Advance the cursor past slot 1, then mark slot 1 transmitted: the
        // scan has to wrap to find it.
        let a = store.get(0).unwrap().clone();
        store.confirm_transmitted(0, &a, 0);
        store.push(message(4)); // lands at 0, head -> 1
        let b = store.get(1).unwrap().clone();
        store.confirm_transmitted(1, &b, 0);
        // Move head to 2 by consuming slot 1
        store.push(message(5));
        assert_eq!(store.head(), 2);

        let c = store.get(0).unwrap().clone();
        store.confirm_transmitted(0, &c, 0);
        assert_eq!(store.next_write_slot(), 0);
    }

    #[test]
    fn test_contains_scans_resident_entries() {
        let mut store = MessageStore::new(8, OverwritePolicy::SentOnly);
        store.push(message(0));
        store.push(message(1));

        assert!(store.contains(&message(0)));
        assert!(store.contains(&message(1)));
        assert!(!store.contains(&message(2)));

        // Recipient and transmission metadata are excluded from identity
        let mut relabeled = message(0);
        relabeled.recipient = PeerId(9999);
        relabeled.mark_sent_to(3);
        assert!(store.contains(&relabeled));
    }

    #[test]
    fn test_confirm_transmitted_rejects_overwritten_slot() {
        let mut store = MessageStore::new(2, OverwritePolicy::Blind);
        store.push(message(0));
        let original = store.get(0).unwrap().clone();

        // Wrap the ring so slot 0 now holds a different message
        store.push(message(1));
        store.push(message(2));

        assert!(!store.confirm_transmitted(0, &original, 1));
        assert!(!store.get(0).unwrap().is_transmitted());
    }

    #[test]
    fn test_iter_active_skips_unwritten_slots() {
        let mut store = MessageStore::new(5, OverwritePolicy::SentOnly);
        store.push(message(0));
        store.push(message(1));

        let active: Vec<usize> = store.iter_active().map(|(i, _)| i).collect();
        assert_eq!(active, vec![0, 1]);
    }
}
