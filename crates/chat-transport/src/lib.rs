//! HTTP collaborators for the live-chat sync engine.
//!
//! This crate provides the production implementations of the traits in
//! `chat-core`:
//!
//! - [`RestClient`] - history pages, confirmed sends and ticket lookups over
//!   the REST API ([`ChatBackend`](chat_core::ChatBackend))
//! - [`EventSourceTransport`] - the duplex connection: server push over
//!   Server-Sent Events, outbound intents as JSON POSTs
//!   ([`Transport`](chat_core::Transport))
//!
//! # Example
//!
//! ```no_run
//! use chat_core::{ConversationKey, HistoryQuery};
//! use chat_transport::{RestClient, ServerConfig};
//!
//! # async fn example() -> Result<(), chat_transport::ClientError> {
//! let client = RestClient::connect(ServerConfig::default()).await?;
//!
//! let key = ConversationKey::new("+15551234567");
//! let page = client
//!     .get_customer_messages(key.as_str(), HistoryQuery::latest(30))
//!     .await?;
//! println!("{} messages", page.items.len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod sse;

pub use client::RestClient;
pub use config::{ServerConfig, DEFAULT_REQUEST_TIMEOUT};
pub use error::ClientError;
pub use sse::EventSourceTransport;

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
