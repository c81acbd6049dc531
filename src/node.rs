//! Node orchestration: connection loops, message production, teardown
//!
//! A [`Node`] wires the gossip engine to real connections: an accept loop
//! for inbound peers, a dial loop walking the universe for outbound
//! candidates, and a producer loop originating local messages. All loops run
//! until an external deadline or an explicit shutdown, then the node drains
//! in-flight sessions and hands back a [`SessionReport`].

use rand::Rng;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::error::RumorError;
use crate::gossip::{GossipEngine, SessionRole};
use crate::logging::{MessageStats, SessionReport};
use crate::message::{Body, Message, BODY_LEN};
use crate::peer::{PeerId, PeerTable, PeerUniverse};
use crate::pool::WorkerPool;
use crate::store::OverwritePolicy;

/// Time allowed for in-flight sessions to finish after shutdown fires.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Characters a randomly produced body is drawn from.
const BODY_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789,.-#'?!";

/// Maps transport addresses to peer identities and back.
///
/// The resolution scheme is an external concern: the engine only needs *a*
/// mapping, not any particular one. Implementations must be cheap, they are
/// consulted on every accept and dial.
pub trait PeerAddressMap: Send + Sync {
    /// Identify the peer connecting from `addr`, or `None` when the address
    /// does not belong to the universe.
    fn peer_at(&self, addr: SocketAddr) -> Option<PeerId>;

    /// The address to dial to reach `peer`, or `None` when the peer has no
    /// reachable address.
    fn addr_of(&self, peer: PeerId) -> Option<SocketAddr>;
}

/// Address mapping that encodes the peer ID in the low two IPv4 octets:
/// peer `c * 100 + d` lives at `base.0.c.d`.
#[derive(Debug, Clone)]
pub struct SubnetAddressMap {
    base: [u8; 2],
    port: u16,
}

impl SubnetAddressMap {
    /// Create a map over the `base.0/16` subnet with a fixed gossip port.
    pub fn new(base: [u8; 2], port: u16) -> Self {
        Self { base, port }
    }
}

impl PeerAddressMap for SubnetAddressMap {
    fn peer_at(&self, addr: SocketAddr) -> Option<PeerId> {
        match addr.ip() {
            IpAddr::V4(ip) => {
                let [_, _, c, d] = ip.octets();
                Some(PeerId(c as u32 * 100 + d as u32))
            }
            IpAddr::V6(_) => None,
        }
    }

    fn addr_of(&self, peer: PeerId) -> Option<SocketAddr> {
        let id = peer.0;
        if id > 255 * 100 + 99 {
            return None;
        }
        let c = (id / 100) as u8;
        let d = (id % 100) as u8;
        Some(SocketAddr::from((
            [self.base[0], self.base[1], c, d],
            self.port,
        )))
    }
}

/// Configuration for a dissemination node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's peer ID; must be part of the universe
    pub node_id: PeerId,
    /// Local listening address for inbound gossip connections
    pub bind_address: SocketAddr,
    /// The fixed universe of known peer IDs
    pub peers: PeerUniverse,
    /// Slot capacity of the message store
    pub store_capacity: usize,
    /// Which slot a push may reclaim once the store wrapped
    pub overwrite_policy: OverwritePolicy,
    /// Slot capacity of the inbox
    pub inbox_capacity: usize,
    /// Concurrent session slots; zero forces every session inline
    pub worker_pool_size: usize,
    /// Ceiling on completed sessions with the same peer
    pub max_sessions_per_peer: u32,
    /// Pause between dial sweeps over the universe
    pub dial_interval: Duration,
    /// Per-peer connect timeout during a dial sweep
    pub dial_timeout: Duration,
    /// Random delay range between local message productions
    pub producer_delay: (Duration, Duration),
    /// Whether the producer loop runs at all
    pub produce_messages: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: PeerId(0),
            bind_address: SocketAddr::from(([0, 0, 0, 0], 2278)),
            peers: PeerUniverse::List(Vec::new()),
            store_capacity: 2000,
            overwrite_policy: OverwritePolicy::default(),
            inbox_capacity: 2000,
            worker_pool_size: 4,
            max_sessions_per_peer: 100,
            dial_interval: Duration::from_secs(1),
            dial_timeout: Duration::from_secs(1),
            producer_delay: (Duration::from_secs(60), Duration::from_secs(300)),
            produce_messages: true,
        }
    }
}

/// A running dissemination participant.
pub struct Node {
    config: NodeConfig,
    engine: Arc<GossipEngine>,
    pool: WorkerPool,
    address_map: Arc<dyn PeerAddressMap>,
    shutdown: watch::Sender<bool>,
}

impl Node {
    /// Construct a node, validating the configuration.
    pub fn new(
        config: NodeConfig,
        address_map: Arc<dyn PeerAddressMap>,
    ) -> Result<Self, RumorError> {
        if config.store_capacity == 0 {
            return Err(RumorError::config("store capacity must be nonzero"));
        }
        if config.inbox_capacity == 0 {
            return Err(RumorError::config("inbox capacity must be nonzero"));
        }
        if config.producer_delay.0 > config.producer_delay.1 {
            return Err(RumorError::config(
                "producer delay range minimum exceeds maximum",
            ));
        }

        let table = PeerTable::new(&config.peers)?;
        if !table.contains(config.node_id) {
            return Err(RumorError::config(format!(
                "own ID {} is not part of the peer universe",
                config.node_id
            )));
        }

        let engine = Arc::new(GossipEngine::new(
            config.node_id,
            table,
            config.store_capacity,
            config.overwrite_policy,
            config.inbox_capacity,
            config.max_sessions_per_peer,
        ));
        let pool = WorkerPool::new(config.worker_pool_size);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            engine,
            pool,
            address_map,
            shutdown,
        })
    }

    /// This node's peer ID.
    pub fn node_id(&self) -> PeerId {
        self.config.node_id
    }

    /// Node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The shared gossip engine, for diagnostics and direct publication.
    pub fn engine(&self) -> &Arc<GossipEngine> {
        &self.engine
    }

    /// Originate a message from this node.
    pub async fn publish(&self, recipient: PeerId, body: Body) -> usize {
        let message = Message::now(self.config.node_id, recipient, body);
        self.engine.publish(message).await
    }

    /// Snapshot of the dissemination counters.
    pub async fn stats(&self) -> MessageStats {
        self.engine.stats().await
    }

    /// Request all loops to stop at their next blocking wait.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Run the node until the deadline elapses or [`Node::shutdown`] fires.
    ///
    /// Binds the listener first: a bind failure is the one fatal error and
    /// is returned before any loop starts. Everything after that is handled
    /// inside the loops.
    pub async fn run(&self, deadline: Option<Duration>) -> Result<SessionReport, RumorError> {
        let listener = TcpListener::bind(self.config.bind_address).await?;
        let local = listener.local_addr()?;
        info!(node = %self.config.node_id, %local, "node listening");

        let started = Instant::now();
        let mut loops = JoinSet::new();

        {
            let engine = Arc::clone(&self.engine);
            let pool = self.pool.clone();
            let map = Arc::clone(&self.address_map);
            let shutdown = self.shutdown.subscribe();
            loops.spawn(accept_loop(engine, pool, map, listener, shutdown));
        }
        {
            let engine = Arc::clone(&self.engine);
            let pool = self.pool.clone();
            let map = Arc::clone(&self.address_map);
            let shutdown = self.shutdown.subscribe();
            let local_ip = self.config.bind_address.ip();
            let interval = self.config.dial_interval;
            let timeout = self.config.dial_timeout;
            loops.spawn(dial_loop(
                engine, pool, map, local_ip, interval, timeout, shutdown,
            ));
        }
        if self.config.produce_messages {
            let engine = Arc::clone(&self.engine);
            let delay = self.config.producer_delay;
            let shutdown = self.shutdown.subscribe();
            loops.spawn(producer_loop(engine, delay, shutdown));
        }

        // Wait for the deadline or an external shutdown request.
        let mut shutdown_rx = self.shutdown.subscribe();
        match deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep(deadline) => {
                        info!(node = %self.config.node_id, "deadline reached, shutting down");
                    }
                    _ = shutdown_rx.changed() => {}
                }
            }
            None => {
                let _ = shutdown_rx.changed().await;
            }
        }
        let _ = self.shutdown.send(true);

        while let Some(result) = loops.join_next().await {
            if let Err(error) = result {
                warn!(%error, "loop task ended abnormally");
            }
        }

        let stats = self.engine.stats().await;
        let report = SessionReport {
            node: self.config.node_id,
            duration_secs: started.elapsed().as_secs_f64(),
            produced_delay_avg_secs: stats.produced_delay_avg_secs(),
            stats,
            peers: self.engine.connection_summaries().await,
        };
        info!(node = %self.config.node_id, "\n{}", report.text_summary());
        Ok(report)
    }
}

/// Give in-flight sessions a grace period, then abort the stragglers.
/// Aborting is safe: every shared-state mutation is a single lock-scoped
/// operation, so a cancelled session cannot leave partial state behind.
async fn drain_sessions(mut sessions: JoinSet<()>) {
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;
    sessions.abort_all();
}

/// Hand a connected channel to the engine, on a pooled slot when one is
/// free, inline on this loop otherwise.
async fn dispatch(
    engine: &Arc<GossipEngine>,
    pool: &WorkerPool,
    sessions: &mut JoinSet<()>,
    stream: TcpStream,
    peer: PeerId,
    role: SessionRole,
) {
    match pool.try_acquire() {
        Some(slot) => {
            let engine = Arc::clone(engine);
            sessions.spawn(async move {
                let _slot = slot;
                engine.run_session(stream, peer, role).await;
            });
        }
        None => {
            // Pool exhausted: degrade to serial execution instead of
            // refusing the connection.
            engine.run_session(stream, peer, role).await;
        }
    }
}

async fn accept_loop(
    engine: Arc<GossipEngine>,
    pool: WorkerPool,
    map: Arc<dyn PeerAddressMap>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let Some(peer) = map.peer_at(remote) else {
                        info!(%remote, "connection from unmapped address, dropping");
                        continue;
                    };
                    debug!(%peer, %remote, "inbound connection");
                    dispatch(&engine, &pool, &mut sessions, stream, peer, SessionRole::Responder)
                        .await;
                }
                Err(error) => {
                    warn!(%error, "accept failed");
                }
            }
        }
    }

    drain_sessions(sessions).await;
}

async fn dial_loop(
    engine: Arc<GossipEngine>,
    pool: WorkerPool,
    map: Arc<dyn PeerAddressMap>,
    local_ip: IpAddr,
    interval: Duration,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'sweep: loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let candidates: Vec<PeerId> = engine.table().iter().collect();
        for peer in candidates {
            if *shutdown.borrow() {
                break 'sweep;
            }
            if !engine.should_dial(peer).await {
                continue;
            }
            let Some(addr) = map.addr_of(peer) else {
                continue;
            };

            match tokio::time::timeout(timeout, connect_from(local_ip, addr)).await {
                Ok(Ok(stream)) => {
                    debug!(%peer, %addr, "outbound connection");
                    dispatch(&engine, &pool, &mut sessions, stream, peer, SessionRole::Initiator)
                        .await;
                }
                Ok(Err(error)) => {
                    // Peer not listening right now: move on to the next
                    // candidate.
                    trace!(%peer, %addr, %error, "dial failed");
                }
                Err(_) => {
                    trace!(%peer, %addr, "dial timed out");
                }
            }
        }
    }

    drain_sessions(sessions).await;
}

/// Connect to `addr`, binding the local side to this node's own IP so the
/// remote end can identify us by source address.
async fn connect_from(local_ip: IpAddr, addr: SocketAddr) -> std::io::Result<TcpStream> {
    if local_ip.is_unspecified() {
        return TcpStream::connect(addr).await;
    }
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.bind(SocketAddr::new(local_ip, 0))?;
    socket.connect(addr).await
}

async fn producer_loop(
    engine: Arc<GossipEngine>,
    delay_range: (Duration, Duration),
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let delay = random_delay(delay_range);
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        let message = random_message(engine.self_id(), engine.table());
        debug!(
            recipient = %message.recipient,
            delay_secs = delay.as_secs_f64(),
            "producing local message"
        );
        engine.record_production_delay(delay.as_secs_f64()).await;
        engine.publish(message).await;
    }
}

fn random_delay((min, max): (Duration, Duration)) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_millis() as u64;
    min + Duration::from_millis(rand::thread_rng().gen_range(0..=span))
}

/// A locally originated message with a random recipient from the universe
/// and a random printable body.
fn random_message(sender: PeerId, table: &PeerTable) -> Message {
    let mut rng = rand::thread_rng();

    let mut recipient = table
        .get(rng.gen_range(0..table.len()))
        .unwrap_or(sender);
    if recipient == sender && table.len() > 1 {
        // Re-roll once lands on a neighbor often enough; walk instead.
        let index = table.resolve_index(sender).unwrap_or(0);
        recipient = table.get((index + 1) % table.len()).unwrap_or(sender);
    }

    let mut body = [0u8; BODY_LEN];
    for byte in body.iter_mut().take(BODY_LEN - 1) {
        *byte = BODY_CHARSET[rng.gen_range(0..BODY_CHARSET.len())];
    }
    body[BODY_LEN - 1] = 0;

    Message::now(sender, recipient, Body::from_bytes(&body))
}

/// Builder for creating and configuring dissemination nodes
pub struct NodeBuilder {
    config: NodeConfig,
    address_map: Option<Arc<dyn PeerAddressMap>>,
}

impl NodeBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            address_map: None,
        }
    }

    /// Set this node's peer ID
    pub fn with_node_id(mut self, id: impl Into<PeerId>) -> Self {
        self.config.node_id = id.into();
        self
    }

    /// Set the listening address
    pub fn with_bind_address(mut self, address: SocketAddr) -> Self {
        self.config.bind_address = address;
        self
    }

    /// Set the peer universe
    pub fn with_peers(mut self, peers: PeerUniverse) -> Self {
        self.config.peers = peers;
        self
    }

    /// Set the message store capacity
    pub fn with_store_capacity(mut self, capacity: usize) -> Self {
        self.config.store_capacity = capacity;
        self
    }

    /// Set the store overwrite policy
    pub fn with_overwrite_policy(mut self, policy: OverwritePolicy) -> Self {
        self.config.overwrite_policy = policy;
        self
    }

    /// Set the inbox capacity
    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.config.inbox_capacity = capacity;
        self
    }

    /// Set the worker pool size
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.config.worker_pool_size = size;
        self
    }

    /// Set the per-peer session ceiling
    pub fn with_max_sessions_per_peer(mut self, max: u32) -> Self {
        self.config.max_sessions_per_peer = max;
        self
    }

    /// Set the pause between dial sweeps
    pub fn with_dial_interval(mut self, interval: Duration) -> Self {
        self.config.dial_interval = interval;
        self
    }

    /// Set the per-peer connect timeout
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.config.dial_timeout = timeout;
        self
    }

    /// Set the random delay range between productions
    pub fn with_producer_delay(mut self, min: Duration, max: Duration) -> Self {
        self.config.producer_delay = (min, max);
        self
    }

    /// Enable or disable the producer loop
    pub fn with_producer(mut self, enabled: bool) -> Self {
        self.config.produce_messages = enabled;
        self
    }

    /// Set the address-to-peer mapping collaborator
    pub fn with_address_map(mut self, map: Arc<dyn PeerAddressMap>) -> Self {
        self.address_map = Some(map);
        self
    }

    /// Build the node
    pub fn build(self) -> Result<Node, RumorError> {
        let address_map = self.address_map.unwrap_or_else(|| {
            Arc::new(SubnetAddressMap::new(
                [10, 0],
                self.config.bind_address.port(),
            ))
        });
        Node::new(self.config, address_map)
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
