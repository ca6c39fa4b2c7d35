//! Error types for chat-transport.

use chat_core::{BackendError, TransportError};
use thiserror::Error;

/// Errors that can occur when talking to the chat server over HTTP.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Server answered `success: false`.
    #[error("Rejected by server: {0}")]
    Rejected(String),

    /// SSE stream error.
    #[error("SSE error: {0}")]
    Sse(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<ClientError> for BackendError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Status { status, body } => BackendError::Status { status, body },
            ClientError::Json(e) => BackendError::Decode(e.to_string()),
            ClientError::Http(e) if e.is_decode() => BackendError::Decode(e.to_string()),
            ClientError::Rejected(reason) => BackendError::Rejected(reason),
            other => BackendError::Request(other.to_string()),
        }
    }
}

impl From<ClientError> for TransportError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Json(e) => TransportError::Protocol(e.to_string()),
            ClientError::Sse(reason) => TransportError::Closed(reason),
            other => TransportError::Emit(other.to_string()),
        }
    }
}
