//! Core types and collaborator traits for the live-chat sync engine.
//!
//! This crate provides the shared vocabulary used by every other crate in
//! the workspace. It defines:
//!
//! - [`Message`] / [`ConversationKey`] / [`SenderKind`] - One chat line and
//!   the conversation it belongs to
//! - [`ServerEvent`] / [`EventKind`] - Typed events pushed by the server
//! - [`ClientIntent`] / [`SocketRequest`] - Typed outbound intents
//! - [`Transport`] / [`ChatBackend`] - The duplex connection and REST
//!   collaborators the engine is written against
//!
//! # Example
//!
//! ```rust
//! use chat_core::{ConversationKey, Message, SenderKind};
//! use chrono::Utc;
//!
//! let key = ConversationKey::new("+15551234567");
//! let now = Utc::now();
//! let echo = Message::optimistic(&key, "Hello", now);
//! let push = Message::new(&key, SenderKind::Agent, "Hello", now);
//!
//! assert!(echo.id.starts_with("temp_"));
//! assert!(push.is_duplicate_of(&echo));
//! ```

mod backend;
mod error;
mod event;
mod intent;
mod message;
mod ticket;
mod trait_def;

pub use backend::{HistoryPage, HistoryQuery, SendReceipt, SortOrder};
pub use error::{BackendError, TransportError};
pub use event::{
    AgentConnected, AgentMessageEvent, ConnectionStatus, CustomerConnected, CustomerMessageEvent,
    CustomerRef, EventKind, FormStepEvent, InteractivePrompt, MessagesAcknowledged,
    ResponsePayload, ServerError, ServerEvent, SystemMessageEvent, TicketCreatedEvent,
};
pub use intent::{ClientIntent, SocketRequest};
pub use message::{
    parse_timestamp, ConversationKey, IdOrigin, Message, MessageRecord, RecordId, SenderKind,
    DUPLICATE_WINDOW_MS, PLACEHOLDER_TEXT,
};
pub use ticket::{TicketStatus, TicketSummary};
pub use trait_def::{ChatBackend, EventStream, Transport};

// Re-export async_trait for collaborator implementations
pub use async_trait::async_trait;
