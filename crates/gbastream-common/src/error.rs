//! Common error types for GBA Stream.

use thiserror::Error;

/// Result type alias using the shared error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for streaming-session operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket, stdin, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound message could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Inbound frame was not a recognised signaling message
    #[error("decode error: {0}")]
    Decode(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Signaling transport failed (refused, dropped, closed)
    #[error("transport error: {0}")]
    Transport(String),

    /// Description or candidate was rejected by the media connection
    #[error("negotiation error: {0}")]
    Negotiation(String),

    /// Peer sent something that makes no sense in the current state
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a decode error from any displayable type.
    pub fn decode(msg: impl std::fmt::Display) -> Self {
        Self::Decode(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a transport error from any displayable type.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create a negotiation error from any displayable type.
    pub fn negotiation(msg: impl std::fmt::Display) -> Self {
        Self::Negotiation(msg.to_string())
    }

    /// Create a protocol error from any displayable type.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }

    /// Create a timeout error from any displayable type.
    pub fn timeout(msg: impl std::fmt::Display) -> Self {
        Self::Timeout(msg.to_string())
    }

    /// Create an internal error from any displayable type.
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self::Internal(msg.to_string())
    }

    /// Transport failures are routed to the reconnection supervisor instead
    /// of being treated as fatal.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io(_) | Self::Timeout(_))
    }
}
