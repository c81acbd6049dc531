//! Error types for the rumornet dissemination engine

use thiserror::Error;

/// Main error type for rumornet operations
#[derive(Error, Debug)]
pub enum RumorError {
    /// Wire record framing errors (short record, or a field that does not
    /// parse as decimal ASCII)
    #[error("Framing error: {message} (record length: {len})")]
    Frame { message: String, len: usize },

    /// Peer identification and directory errors
    #[error("Peer error: {message} (peer: {peer})")]
    Peer { message: String, peer: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Join handle errors
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl RumorError {
    /// Create a framing error
    pub fn frame(message: impl Into<String>, len: usize) -> Self {
        Self::Frame {
            message: message.into(),
            len,
        }
    }

    /// Create a peer error
    pub fn peer(message: impl Into<String>, peer: impl std::fmt::Display) -> Self {
        Self::Peer {
            message: message.into(),
            peer: peer.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
