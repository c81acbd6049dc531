//! Gossip exchange engine
//!
//! One [`GossipEngine`] per node owns the shared dissemination state (store,
//! inbox, peer directory, counters) and drives one exchange per connected
//! peer: a guard check under the directory lock, a receive phase and a
//! transmit phase ordered by who initiated the connection, and a closing
//! step that releases every resource. All per-connection errors are handled
//! here and never escalate past the session boundary.

use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::codec::{self, RECORD_LEN};
use crate::inbox::Inbox;
use crate::logging::{CorrelationId, MessageStats, PeerSessionSummary};
use crate::message::Message;
use crate::peer::{Activation, ConnectionLog, PeerDirectory, PeerId, PeerTable};
use crate::store::{MessageStore, OverwritePolicy};

/// Which side opened the connection; decides the exchange order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// This node dialed the peer: receive first, then transmit.
    Initiator,
    /// This node accepted the connection: transmit first, then receive.
    Responder,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The guard check rejected the session (peer unknown, already in a
    /// session, or out of session budget); nothing was exchanged.
    Skipped,
    /// A full exchange ran to completion.
    Completed {
        /// Messages accepted from the peer (after dedup)
        received: u64,
        /// Messages written to the peer
        transmitted: u64,
    },
}

/// Directory flags and the per-peer session budget share one lock: the guard
/// check consults both before a session may proceed.
#[derive(Debug)]
struct DirectoryState {
    directory: PeerDirectory,
    log: ConnectionLog,
}

/// Shared dissemination state and the per-connection exchange driver.
pub struct GossipEngine {
    self_id: PeerId,
    table: PeerTable,
    store: Mutex<MessageStore>,
    inbox: Mutex<Inbox>,
    directory: Mutex<DirectoryState>,
    stats: Mutex<MessageStats>,
}

impl GossipEngine {
    /// Build the engine with freshly constructed shared state.
    pub fn new(
        self_id: PeerId,
        table: PeerTable,
        store_capacity: usize,
        policy: OverwritePolicy,
        inbox_capacity: usize,
        max_sessions_per_peer: u32,
    ) -> Self {
        let peer_count = table.len();
        Self {
            self_id,
            table,
            store: Mutex::new(MessageStore::new(store_capacity, policy)),
            inbox: Mutex::new(Inbox::new(inbox_capacity)),
            directory: Mutex::new(DirectoryState {
                directory: PeerDirectory::new(peer_count),
                log: ConnectionLog::new(peer_count, max_sessions_per_peer),
            }),
            stats: Mutex::new(MessageStats::default()),
        }
    }

    /// This node's own peer ID.
    pub fn self_id(&self) -> PeerId {
        self.self_id
    }

    /// The fixed peer universe table.
    pub fn table(&self) -> &PeerTable {
        &self.table
    }

    /// Run one gossip session over a connected duplex channel.
    ///
    /// The channel is consumed and dropped when the session closes. Skips
    /// and per-record failures are logged, never returned: liveness under
    /// connection races is part of the contract.
    pub async fn run_session<S>(&self, mut channel: S, peer: PeerId, role: SessionRole) -> SessionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let correlation = CorrelationId::new();

        // GUARD_CHECK: existence test and activation are one operation under
        // the directory lock, so a concurrent session with the same peer is
        // rejected here and not deeper in.
        let peer_index = {
            let mut state = self.directory.lock().await;
            match state.directory.try_activate(&self.table, peer) {
                Activation::Unknown => {
                    warn!(
                        correlation_id = %correlation.short(),
                        %peer,
                        "peer not in the known universe, skipping session"
                    );
                    return SessionOutcome::Skipped;
                }
                Activation::AlreadyActive => {
                    info!(
                        correlation_id = %correlation.short(),
                        %peer,
                        "active session with peer found, skipping"
                    );
                    return SessionOutcome::Skipped;
                }
                Activation::Activated(index) => {
                    if !state.log.allows_session(index) {
                        state.directory.deactivate(index);
                        info!(
                            correlation_id = %correlation.short(),
                            %peer,
                            "session budget with peer exhausted, skipping"
                        );
                        return SessionOutcome::Skipped;
                    }
                    index
                }
            }
        };

        debug!(
            correlation_id = %correlation.short(),
            %peer,
            ?role,
            "gossip exchange starting"
        );
        let started = Instant::now();

        // EXCHANGE: complementary half-duplex order. The responder writes
        // first and half-closes so the initiator's receive loop terminates;
        // then the roles flip for the second half.
        let (received, transmitted) = match role {
            SessionRole::Responder => {
                let sent = self.transmit_phase(&mut channel, peer_index).await;
                let _ = channel.shutdown().await;
                let recv = self.receive_phase(&mut channel, peer_index).await;
                (recv, sent)
            }
            SessionRole::Initiator => {
                let recv = self.receive_phase(&mut channel, peer_index).await;
                let sent = self.transmit_phase(&mut channel, peer_index).await;
                let _ = channel.shutdown().await;
                (recv, sent)
            }
        };

        // CLOSED: record timing, release the directory flag, drop the
        // channel.
        {
            let mut state = self.directory.lock().await;
            state.log.record(peer_index, started.elapsed());
            state.directory.deactivate(peer_index);
        }

        info!(
            correlation_id = %correlation.short(),
            %peer,
            received,
            transmitted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "gossip exchange finished"
        );

        SessionOutcome::Completed {
            received,
            transmitted,
        }
    }

    /// Read fixed-length records until the stream ends, storing every
    /// first-seen message. A short read or an undecodable record ends the
    /// phase; neither is an error.
    async fn receive_phase<R>(&self, channel: &mut R, peer_index: usize) -> u64
    where
        R: AsyncRead + Unpin,
    {
        let mut record = [0u8; RECORD_LEN];
        let mut received = 0u64;

        loop {
            if let Err(error) = channel.read_exact(&mut record).await {
                debug!(%error, "receive phase ended");
                break;
            }

            let mut message = match codec::decode(&record) {
                Ok(message) => message,
                Err(error) => {
                    debug!(%error, "undecodable record, treating as end of stream");
                    break;
                }
            };

            let for_me = message.recipient == self.self_id;
            let inbox_copy;
            {
                let mut store = self.store.lock().await;
                if store.contains(&message) {
                    // Idempotent re-delivery
                    continue;
                }
                // The sending peer has this message by definition; flag it
                // only after the dedup check passed so it is never echoed
                // back.
                message.mark_sent_to(peer_index);
                inbox_copy = for_me.then(|| message.clone());
                store.push(message);
            }

            if let Some(copy) = inbox_copy {
                self.inbox.lock().await.push(copy);
            }
            self.stats.lock().await.received += 1;
            received += 1;
        }

        received
    }

    /// Write every resident message the peer has not seen yet, marking each
    /// slot after a successful write. A write failure ends the phase.
    async fn transmit_phase<W>(&self, channel: &mut W, peer_index: usize) -> u64
    where
        W: AsyncWrite + Unpin,
    {
        let capacity = self.store.lock().await.capacity();
        let mut transmitted = 0u64;

        for index in 0..capacity {
            // Snapshot and encode under the lock, write outside it.
            let candidate = {
                let store = self.store.lock().await;
                match store.get(index) {
                    Some(message) if !message.sent_to(peer_index) => {
                        Some((message.clone(), codec::encode(message)))
                    }
                    _ => None,
                }
            };
            let Some((message, record)) = candidate else {
                continue;
            };

            if let Err(error) = channel.write_all(&record).await {
                debug!(%error, "transmit phase ended");
                break;
            }

            // The slot may have been reclaimed while the write was in
            // flight; only a confirmed mark counts.
            let confirmed = self
                .store
                .lock()
                .await
                .confirm_transmitted(index, &message, peer_index);
            if confirmed {
                self.stats.lock().await.transmitted += 1;
                transmitted += 1;
            }
        }

        let _ = channel.flush().await;
        transmitted
    }

    /// Append a locally originated message to the store.
    ///
    /// Entry point for the message-production collaborator; takes the same
    /// store lock a session's push takes. Returns the slot written.
    pub async fn publish(&self, message: Message) -> usize {
        let slot = self.store.lock().await.push(message);
        self.stats.lock().await.produced += 1;
        slot
    }

    /// Accumulate the delay that preceded a production, for the report.
    pub async fn record_production_delay(&self, secs: f64) {
        self.stats.lock().await.produced_delay_total_secs += secs;
    }

    /// Whether the dial loop should bother connecting to this peer right
    /// now.
    pub async fn should_dial(&self, peer: PeerId) -> bool {
        if peer == self.self_id {
            return false;
        }
        let Some(index) = self.table.resolve_index(peer) else {
            return false;
        };
        let state = self.directory.lock().await;
        !state.directory.is_active(index) && state.log.allows_session(index)
    }

    /// Snapshot of the dissemination counters.
    pub async fn stats(&self) -> MessageStats {
        self.stats.lock().await.clone()
    }

    /// Number of resident messages in the store.
    pub async fn store_len(&self) -> usize {
        self.store.lock().await.len()
    }

    /// Number of resident messages addressed to this node.
    pub async fn inbox_len(&self) -> usize {
        self.inbox.lock().await.len()
    }

    /// Clone of every message currently addressed to this node.
    pub async fn inbox_messages(&self) -> Vec<Message> {
        self.inbox.lock().await.iter().cloned().collect()
    }

    /// Whether an identical message is resident in the store.
    pub async fn store_contains(&self, message: &Message) -> bool {
        self.store.lock().await.contains(message)
    }

    /// Per-peer session summaries for the teardown report.
    pub async fn connection_summaries(&self) -> Vec<PeerSessionSummary> {
        let state = self.directory.lock().await;
        self.table
            .iter()
            .enumerate()
            .filter(|&(index, _)| state.log.session_count(index) > 0)
            .map(|(index, peer)| PeerSessionSummary {
                peer,
                sessions: state.log.session_count(index) as u64,
                connected_secs: state.log.total_connected(index).as_secs_f64(),
            })
            .collect()
    }
}
