//! Message type and transmission bookkeeping
//!
//! This module defines the unit of dissemination: a fixed-capacity text
//! message carrying a per-peer transmission bitmap that prevents redundant
//! re-sends and self-echo.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::peer::PeerId;

/// Fixed capacity of a message body in bytes.
pub const BODY_LEN: usize = 256;

/// Fixed-capacity message payload: printable ASCII, NUL-padded to
/// [`BODY_LEN`] bytes.
///
/// Equality compares the full padded buffer, so two bodies differing only in
/// trailing padding are distinct payloads on the wire and in dedup checks.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Body {
    bytes: [u8; BODY_LEN],
}

impl Body {
    /// Build a body from text, truncating at capacity and padding with NUL.
    pub fn from_text(text: &str) -> Self {
        Self::from_bytes(text.as_bytes())
    }

    /// Build a body from raw bytes, truncating at capacity and padding with
    /// NUL.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut bytes = [0u8; BODY_LEN];
        let n = data.len().min(BODY_LEN);
        bytes[..n].copy_from_slice(&data[..n]);
        Self { bytes }
    }

    /// The full padded buffer, always [`BODY_LEN`] bytes.
    pub fn as_bytes(&self) -> &[u8; BODY_LEN] {
        &self.bytes
    }

    /// Text up to the first NUL byte.
    pub fn text(&self) -> Cow<'_, str> {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(BODY_LEN);
        String::from_utf8_lossy(&self.bytes[..end])
    }

    /// True when the body carries no bytes before the padding.
    pub fn is_empty(&self) -> bool {
        self.bytes[0] == 0
    }
}

impl Default for Body {
    fn default() -> Self {
        Self {
            bytes: [0u8; BODY_LEN],
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Body({:?})", self.text())
    }
}

impl Serialize for Body {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text())
    }
}

impl<'de> Deserialize<'de> for Body {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Self::from_text(&text))
    }
}

/// Per-peer transmission bitmap, one bit per known-peer table index.
///
/// Grows on demand so a freshly decoded message starts empty regardless of
/// the configured universe size; reads past the allocated words are false.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransmitMap {
    words: Vec<u64>,
}

impl TransmitMap {
    /// Set the bit for a peer index.
    pub fn set(&mut self, index: usize) {
        let word = index / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (index % 64);
    }

    /// Read the bit for a peer index.
    pub fn get(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .map(|w| w & (1 << (index % 64)) != 0)
            .unwrap_or(false)
    }

    /// True iff any bit is set.
    pub fn any(&self) -> bool {
        self.words.iter().any(|&w| w != 0)
    }

    /// Clear all bits.
    pub fn clear(&mut self) {
        self.words.clear();
    }
}

/// The unit of dissemination.
///
/// Identity for de-duplication is the tuple (sender, created_at, body);
/// recipient and transmission metadata are excluded. Once stored, a message
/// is mutated in place only to flip transmission bits and is reclaimed only
/// when its storage slot is overwritten.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Originating peer ID
    pub sender: PeerId,
    /// Addressed peer ID
    pub recipient: PeerId,
    /// Creation timestamp, seconds since the Unix epoch
    pub created_at: u64,
    /// Fixed-capacity payload
    pub body: Body,
    /// Which peers have already received this message
    #[serde(skip)]
    transmit: TransmitMap,
    /// Cached flag, true iff any transmit bit is set
    #[serde(skip)]
    transmitted: bool,
}

impl Message {
    /// Create a message with an explicit creation timestamp.
    pub fn new(sender: PeerId, recipient: PeerId, created_at: u64, body: Body) -> Self {
        Self {
            sender,
            recipient,
            created_at,
            body,
            transmit: TransmitMap::default(),
            transmitted: false,
        }
    }

    /// Create a message stamped with the current wall clock.
    pub fn now(sender: PeerId, recipient: PeerId, body: Body) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self::new(sender, recipient, created_at, body)
    }

    /// Record that the peer at `peer_index` has received this message.
    pub fn mark_sent_to(&mut self, peer_index: usize) {
        self.transmit.set(peer_index);
        self.transmitted = true;
    }

    /// Whether the peer at `peer_index` has already received this message.
    pub fn sent_to(&self, peer_index: usize) -> bool {
        self.transmit.get(peer_index)
    }

    /// Whether this message has been sent to at least one peer.
    pub fn is_transmitted(&self) -> bool {
        self.transmitted
    }

    /// Drop all transmission metadata, as if freshly created.
    pub fn reset_transmission(&mut self) {
        self.transmit.clear();
        self.transmitted = false;
    }

    /// Dedup identity check: same (sender, created_at, body).
    pub fn same_payload(&self, other: &Message) -> bool {
        self.sender == other.sender
            && self.created_at == other.created_at
            && self.body == other.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_truncates_and_pads() {
        let body = Body::from_text("hello");
        assert_eq!(body.text(), "hello");
        assert_eq!(body.as_bytes().len(), BODY_LEN);
        assert_eq!(body.as_bytes()[5], 0);

        let long = "x".repeat(BODY_LEN + 40);
        let body = Body::from_text(&long);
        assert_eq!(body.text().len(), BODY_LEN);
    }

    #[test]
    fn test_body_padding_is_significant() {
        let a = Body::from_text("same");
        let b = Body::from_bytes(b"same\x00extra");
        assert_ne!(a, b);
    }

    #[test]
    fn test_transmit_map_grows_on_demand() {
        let mut map = TransmitMap::default();
        assert!(!map.get(0));
        assert!(!map.get(900));
        assert!(!map.any());

        map.set(70);
        assert!(map.get(70));
        assert!(!map.get(69));
        assert!(map.any());

        map.clear();
        assert!(!map.any());
    }

    #[test]
    fn test_message_transmission_bits() {
        let mut msg = Message::new(
            PeerId(8001),
            PeerId(8600),
            1_700_000_000,
            Body::from_text("payload"),
        );

        assert!(!msg.is_transmitted());
        msg.mark_sent_to(3);
        assert!(msg.is_transmitted());
        assert!(msg.sent_to(3));
        assert!(!msg.sent_to(2));

        msg.reset_transmission();
        assert!(!msg.is_transmitted());
        assert!(!msg.sent_to(3));
    }

    #[test]
    fn test_same_payload_excludes_recipient_and_metadata() {
        let base = Message::new(
            PeerId(8001),
            PeerId(8600),
            1_700_000_000,
            Body::from_text("identical"),
        );

        let mut other = base.clone();
        other.recipient = PeerId(9005);
        other.mark_sent_to(1);
        assert!(base.same_payload(&other));

        let mut different = base.clone();
        different.created_at += 1;
        assert!(!base.same_payload(&different));
    }
}
