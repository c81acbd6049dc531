//! Peer identity, the fixed peer universe, and the active-session directory
//!
//! Every participant is identified by a small numeric ID drawn from a fixed,
//! sorted universe known to all nodes. Index resolution into that table is a
//! pure binary search; the directory and connection log are flag/counter
//! arrays keyed by the resolved index.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::RumorError;

/// Numeric identifier of a participant node.
///
/// Rendered zero-padded to four digits, matching the wire format.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({:04})", self.0)
    }
}

impl From<u32> for PeerId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Configured shape of the peer-ID universe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerUniverse {
    /// Explicit list of peer IDs (sorted and deduplicated on table build)
    List(Vec<u32>),
    /// Inclusive numeric range of peer IDs
    Range { min: u32, max: u32 },
}

impl PeerUniverse {
    /// Number of IDs the universe describes.
    pub fn len(&self) -> usize {
        match self {
            Self::List(ids) => ids.len(),
            Self::Range { min, max } => (max.saturating_sub(*min) as usize).saturating_add(1),
        }
    }

    /// True when the universe describes no IDs.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::List(ids) => ids.is_empty(),
            Self::Range { min, max } => max < min,
        }
    }
}

/// Sorted, immutable table of all known peer IDs.
///
/// Built once at startup; every other peer-keyed structure (directory flags,
/// connection log, transmission bitmaps) is indexed by a position in this
/// table.
#[derive(Debug, Clone)]
pub struct PeerTable {
    ids: Vec<PeerId>,
}

impl PeerTable {
    /// Build the table from the configured universe, sorting and removing
    /// duplicates.
    pub fn new(universe: &PeerUniverse) -> Result<Self, RumorError> {
        let mut ids: Vec<PeerId> = match universe {
            PeerUniverse::List(list) => list.iter().copied().map(PeerId).collect(),
            PeerUniverse::Range { min, max } => {
                if max < min {
                    return Err(RumorError::config(format!(
                        "peer range is empty: {min}..={max}"
                    )));
                }
                (*min..=*max).map(PeerId).collect()
            }
        };
        if ids.is_empty() {
            return Err(RumorError::config("peer universe is empty"));
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(Self { ids })
    }

    /// Resolve a peer ID to its table index. O(log P).
    pub fn resolve_index(&self, peer: PeerId) -> Option<usize> {
        self.ids.binary_search(&peer).ok()
    }

    /// Whether the table knows this peer ID.
    pub fn contains(&self, peer: PeerId) -> bool {
        self.resolve_index(peer).is_some()
    }

    /// Peer ID at a table index.
    pub fn get(&self, index: usize) -> Option<PeerId> {
        self.ids.get(index).copied()
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when the table is empty (never after a successful build).
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterate all known peer IDs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.ids.iter().copied()
    }
}

/// Result of attempting to claim a peer for a new gossip session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// The peer was idle and is now flagged active
    Activated(usize),
    /// A session with this peer is already running
    AlreadyActive,
    /// The peer ID is not in the table
    Unknown,
}

/// Tracks which peers currently have an open gossip session.
///
/// A peer maps to at most one flag slot; the flag is a presence marker, not a
/// counter, so callers must gate a second concurrent session through
/// [`PeerDirectory::try_activate`] rather than activating twice.
#[derive(Debug)]
pub struct PeerDirectory {
    active: Vec<bool>,
}

impl PeerDirectory {
    /// Create a directory with every peer idle.
    pub fn new(peer_count: usize) -> Self {
        Self {
            active: vec![false; peer_count],
        }
    }

    /// Whether the peer at `index` currently has an open session.
    pub fn is_active(&self, index: usize) -> bool {
        self.active.get(index).copied().unwrap_or(false)
    }

    /// Whether a session with `peer` is currently open. Unknown peers are
    /// never active.
    pub fn exists(&self, table: &PeerTable, peer: PeerId) -> bool {
        table
            .resolve_index(peer)
            .map(|index| self.is_active(index))
            .unwrap_or(false)
    }

    /// Claim a peer for a session: the existence check and the flag set are
    /// one operation, so callers holding the directory lock get the
    /// mutual-exclusion guarantee for free.
    pub fn try_activate(&mut self, table: &PeerTable, peer: PeerId) -> Activation {
        match table.resolve_index(peer) {
            None => Activation::Unknown,
            Some(index) => {
                if self.active[index] {
                    Activation::AlreadyActive
                } else {
                    self.active[index] = true;
                    Activation::Activated(index)
                }
            }
        }
    }

    /// Release a peer's session flag. Out-of-range indices are no-ops.
    pub fn deactivate(&mut self, index: usize) {
        if let Some(slot) = self.active.get_mut(index) {
            *slot = false;
        }
    }

    /// Number of peers currently in a session.
    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|&&a| a).count()
    }
}

/// Per-peer record of completed gossip sessions and their durations.
///
/// Mirrors the per-peer connection timing exposed to the session report, and
/// enforces the configured ceiling on sessions with the same peer.
#[derive(Debug)]
pub struct ConnectionLog {
    durations: Vec<Vec<Duration>>,
    max_sessions_per_peer: u32,
}

impl ConnectionLog {
    /// Create an empty log for `peer_count` peers.
    pub fn new(peer_count: usize, max_sessions_per_peer: u32) -> Self {
        Self {
            durations: vec![Vec::new(); peer_count],
            max_sessions_per_peer,
        }
    }

    /// Whether another session with the peer at `index` is still allowed.
    pub fn allows_session(&self, index: usize) -> bool {
        self.durations
            .get(index)
            .map(|d| (d.len() as u32) < self.max_sessions_per_peer)
            .unwrap_or(false)
    }

    /// Record a completed session's duration. Out-of-range indices are
    /// no-ops.
    pub fn record(&mut self, index: usize, elapsed: Duration) {
        if let Some(entry) = self.durations.get_mut(index) {
            entry.push(elapsed);
        }
    }

    /// Number of completed sessions with the peer at `index`.
    pub fn session_count(&self, index: usize) -> usize {
        self.durations.get(index).map(Vec::len).unwrap_or(0)
    }

    /// Total connected time with the peer at `index`.
    pub fn total_connected(&self, index: usize) -> Duration {
        self.durations
            .get(index)
            .map(|d| d.iter().sum())
            .unwrap_or_default()
    }
}
