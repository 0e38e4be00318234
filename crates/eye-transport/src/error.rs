//! Error types for the transport module.

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection error (general).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connection lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Invalid hub URL.
    #[error("Invalid hub URL: {0}")]
    InvalidUrl(String),

    /// Send error.
    #[error("Send error: {0}")]
    Send(String),

    /// Not connected.
    #[error("Not connected")]
    NotConnected,

    /// Already connected.
    #[error("Already connected")]
    AlreadyConnected,

    /// Outbound queue is full; the hub is not keeping up.
    #[error("Outbound queue full")]
    QueueFull,

    /// Channel disconnected.
    #[error("Channel disconnected")]
    ChannelDisconnected,

    /// Cache error.
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
