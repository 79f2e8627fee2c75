//! Error types for peerwire.

use thiserror::Error;

/// Main error type for transport-level operations.
///
/// Application handler failures use [`HandlerError`](crate::router::HandlerError)
/// instead; they never surface as a `PeerwireError`.
#[derive(Debug, Error)]
pub enum PeerwireError {
    /// I/O error during socket or file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (bad frame length, truncated field, unknown packet kind).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Route registration rejected (collision or invalid mount).
    #[error("{0}")]
    Route(String),

    /// TCP connect did not complete in time.
    #[error("Connect timed out")]
    ConnectTimeout,

    /// The identity handshake did not complete in time.
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// Hostname could not be resolved.
    #[error("Unknown host: {0}")]
    UnknownHost(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The transport was shut down while the operation was pending.
    #[error("Transport shut down")]
    Shutdown,

    /// The transport was started outside of a tokio runtime.
    #[error("No tokio runtime available")]
    NoRuntime,
}

/// Result type alias using PeerwireError.
pub type Result<T> = std::result::Result<T, PeerwireError>;
