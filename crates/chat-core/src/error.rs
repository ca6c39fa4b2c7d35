//! Error types for the engine's collaborators.

use thiserror::Error;

/// Errors raised by a [`Transport`](crate::Transport) implementation.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// An established connection dropped.
    #[error("connection closed: {0}")]
    Closed(String),

    /// An outbound intent could not be delivered.
    #[error("emit failed: {0}")]
    Emit(String),

    /// The transport has no live connection.
    #[error("not connected")]
    NotConnected,

    /// A frame could not be decoded into a known event.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors raised by a [`ChatBackend`](crate::ChatBackend) implementation.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The server reported `success: false`.
    #[error("rejected: {0}")]
    Rejected(String),
}
