//! Transport Error Types
//!
//! Errors raised by the remote-shell transport layer.

use thiserror::Error;

/// Transport-level errors
///
/// Every variant carries owned strings so the type stays `Clone`; a single
/// connection outcome is handed to every caller waiting on the same attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timeout after {0}ms")]
    ConnectionTimeout(u64),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Host key rejected for {0}")]
    HostKeyRejected(String),

    #[error("Transport not connected")]
    NotConnected,

    #[error("Channel error: {0}")]
    Channel(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::ConnectionFailed(err.to_string())
    }
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
