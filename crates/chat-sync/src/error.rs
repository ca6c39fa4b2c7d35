//! Error type for the sync engine.

use std::time::Duration;

use chat_core::{BackendError, TransportError};
use thiserror::Error;

/// Errors that can occur while keeping a conversation in sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The duplex connection failed.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// A history page could not be fetched.
    #[error("history fetch failed: {0}")]
    Fetch(BackendError),

    /// An agent message was not confirmed by the server.
    #[error("send failed: {0}")]
    Send(String),

    /// The server sent something the engine could not use.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A request got no response in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// There is no live connection.
    #[error("not connected")]
    NotConnected,

    /// The operation needs an active conversation.
    #[error("no active conversation")]
    NoConversation,
}

impl From<TransportError> for SyncError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::NotConnected => SyncError::NotConnected,
            TransportError::Protocol(reason) => SyncError::Protocol(reason),
            other => SyncError::Transport(other),
        }
    }
}

impl From<BackendError> for SyncError {
    fn from(error: BackendError) -> Self {
        SyncError::Fetch(error)
    }
}
