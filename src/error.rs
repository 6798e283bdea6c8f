//! Error types for spalink.

use thiserror::Error;

/// Main error type for all spalink operations.
#[derive(Debug, Error)]
pub enum SpaError {
    /// I/O error during socket operations that maps to no specific domain kind.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (work item payloads).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (malformed header, length mismatch, oversized frame).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The remote peer refused the connection.
    #[error("Connection refused by peer")]
    ConnectionRefused,

    /// The connection was reset or aborted by the peer.
    #[error("Connection reset by peer")]
    PeerReset,

    /// No response arrived within the configured timeout.
    #[error("Response timeout")]
    ResponseTimeout,

    /// The network is unreachable.
    #[error("Network unreachable")]
    NetworkUnreachable,

    /// The configured host could not be resolved.
    #[error("Host could not be resolved: {0}")]
    HostUnresolved(String),

    /// Connection closed while an operation was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The dispatch queue has been shut down and accepts no more items.
    #[error("Dispatch queue closed")]
    QueueClosed,

    /// A failure reported by the external transaction ledger.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// The transaction is in the wrong lifecycle state for the requested action.
    #[error("Invalid transaction state: expected {expected}, found {found}")]
    InvalidState {
        /// The state the operation requires.
        expected: String,
        /// The state actually observed.
        found: String,
    },
}

impl SpaError {
    /// Translate an OS-level socket error into a domain error kind.
    ///
    /// Raw platform errors never reach callers of the transport layer;
    /// anything without a dedicated kind falls through to [`SpaError::Io`].
    pub fn from_socket(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::ConnectionRefused => SpaError::ConnectionRefused,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => SpaError::PeerReset,
            ErrorKind::TimedOut => SpaError::ResponseTimeout,
            ErrorKind::NetworkUnreachable => SpaError::NetworkUnreachable,
            ErrorKind::NotConnected => SpaError::ConnectionClosed,
            _ => SpaError::Io(err),
        }
    }
}

/// Result type alias using SpaError.
pub type Result<T> = std::result::Result<T, SpaError>;
