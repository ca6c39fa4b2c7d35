//! Collaborator traits the engine is written against.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::Stream;

use crate::backend::{HistoryPage, HistoryQuery, SendReceipt};
use crate::error::{BackendError, TransportError};
use crate::event::ServerEvent;
use crate::intent::ClientIntent;
use crate::message::ConversationKey;
use crate::ticket::TicketSummary;

/// Inbound side of an open connection. Ends when the connection drops.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ServerEvent, TransportError>> + Send>>;

/// A duplex connection to the chat server.
///
/// `open` establishes one connection and returns its inbound event stream;
/// it must not return before the server has accepted the connection.
/// Reconnection policy lives above this trait, in the connection manager.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a fresh connection.
    async fn open(&self) -> Result<EventStream, TransportError>;

    /// Deliver an outbound intent over the current connection.
    async fn emit(&self, intent: &ClientIntent) -> Result<(), TransportError>;

    /// Get the transport name (for logging).
    fn name(&self) -> &str;
}

/// Request/response backend used for history, sends and ticket lookups.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Fetch one page of a conversation's history.
    async fn fetch_history(
        &self,
        key: &ConversationKey,
        query: HistoryQuery,
    ) -> Result<HistoryPage, BackendError>;

    /// Send an agent message and wait for the server's confirmation.
    async fn send_message(
        &self,
        key: &ConversationKey,
        text: &str,
        agent_id: &str,
    ) -> Result<SendReceipt, BackendError>;

    /// Tickets of this customer that are not closed.
    async fn fetch_open_tickets(
        &self,
        key: &ConversationKey,
    ) -> Result<Vec<TicketSummary>, BackendError>;
}
