//! In-memory collaborators for testing the live-chat sync engine.
//!
//! This crate provides mock implementations of the `chat-core` traits:
//! - `MockTransport` - A duplex connection the test pushes events into
//! - `MockBackend` - Seeded history, scripted send failures, held fetches
//! - `DelayedBackend` - Wraps another backend with artificial latency
//!
//! For the HTTP implementations, use the `chat-transport` crate instead.
//!
//! # Example
//!
//! ```rust
//! use mock_backend::{ChatBackend, ConversationKey, HistoryQuery, MockBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mock_backend::BackendError> {
//!     let backend = MockBackend::new().with_history("+15551234567", 35);
//!
//!     let key = ConversationKey::new("+15551234567");
//!     let page = backend.fetch_history(&key, HistoryQuery::latest(30)).await?;
//!     assert_eq!(page.items.len(), 30);
//!     Ok(())
//! }
//! ```

mod backend;
mod delayed;
pub mod fixtures;
mod transport;

// Re-export chat-core types for convenience
pub use chat_core::{
    async_trait, BackendError, ChatBackend, ConversationKey, HistoryPage, HistoryQuery,
    ServerEvent, Transport, TransportError,
};

pub use backend::{MockBackend, SentMessage};
pub use delayed::DelayedBackend;
pub use transport::MockTransport;
