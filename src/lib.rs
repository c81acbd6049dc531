//! # rumornet - Epidemic Message Dissemination
//!
//! rumornet implements gossip-style message dissemination across a fixed
//! universe of participant nodes. Every node continuously accepts inbound
//! connections, dials outbound candidates, and exchanges its bounded message
//! store with each connected peer, so that every message eventually reaches
//! every reachable node without re-transmission loops or duplicate storage.
//!
//! ## Core pieces
//!
//! - **Bounded ring store**: fixed-capacity message buffer whose overwrite
//!   policy prefers reclaiming slots that were already transmitted
//! - **Per-peer transmission bitmaps**: a message is never sent twice to the
//!   same peer, and never echoed back to whoever delivered it
//! - **Session directory**: at most one gossip session per peer at a time
//! - **Worker pool**: bounded concurrency with inline fallback when full
//!
//! ## Running a node
//!
//! ```rust,no_run
//! use rumornet::{Body, NodeBuilder, PeerId, PeerUniverse};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = NodeBuilder::new()
//!         .with_node_id(8600u32)
//!         .with_bind_address("10.0.86.0:2278".parse()?)
//!         .with_peers(PeerUniverse::List(vec![8001, 8600, 9026]))
//!         .build()?;
//!
//!     node.publish(PeerId(9026), Body::from_text("hello, mesh")).await;
//!
//!     // Gossip for five minutes, then tear down and report
//!     let report = node.run(Some(Duration::from_secs(300))).await?;
//!     println!("{}", report.text_summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Driving a session over a custom channel
//!
//! The engine is transport-agnostic: anything `AsyncRead + AsyncWrite` can
//! carry an exchange, which is how the tests run full sessions over
//! in-memory pipes.
//!
//! ```rust,no_run
//! use rumornet::{GossipEngine, OverwritePolicy, PeerId, PeerTable, PeerUniverse, SessionRole};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let table = PeerTable::new(&PeerUniverse::List(vec![8001, 8600]))?;
//! let engine = GossipEngine::new(PeerId(8001), table, 2000, OverwritePolicy::SentOnly, 2000, 100);
//!
//! let (channel, _far_end) = tokio::io::duplex(8 * 1024);
//! let outcome = engine.run_session(channel, PeerId(8600), SessionRole::Responder).await;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod gossip;
pub mod inbox;
pub mod logging;
pub mod message;
pub mod node;
pub mod peer;
pub mod pool;
pub mod store;

// Re-export main types for convenience
pub use codec::{decode, encode, RECORD_LEN, SEPARATOR};
pub use error::RumorError;
pub use gossip::{GossipEngine, SessionOutcome, SessionRole};
pub use inbox::Inbox;
pub use logging::{
    development_config, init_logging, production_config, CorrelationId, LogConfig, MessageStats,
    PeerSessionSummary, SessionReport,
};
pub use message::{Body, Message, TransmitMap, BODY_LEN};
pub use node::{Node, NodeBuilder, NodeConfig, PeerAddressMap, SubnetAddressMap};
pub use peer::{Activation, ConnectionLog, PeerDirectory, PeerId, PeerTable, PeerUniverse};
pub use pool::{WorkerPool, WorkerSlot};
pub use store::{MessageStore, OverwritePolicy};

/// Result type alias for rumornet operations
pub type Result<T> = std::result::Result<T, RumorError>;
