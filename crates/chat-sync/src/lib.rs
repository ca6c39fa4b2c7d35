//! Real-time message synchronization for the agent live-chat dashboard.
//!
//! This crate merges three independent message sources into one ordered,
//! deduplicated conversation view:
//!
//! - history pages fetched from a [`ChatBackend`](chat_core::ChatBackend),
//! - live events pushed over a [`Transport`](chat_core::Transport),
//! - the agent's own optimistic sends.
//!
//! The pieces, leaf to root:
//!
//! - [`EventBus`] - typed, ordered, failure-isolated fan-out
//! - [`ConnectionManager`] - one duplex connection with fixed-delay
//!   reconnection and request/response correlation
//! - [`SessionRegistrar`] - identity announcements and room membership
//! - [`MessageStore`] - per-conversation collection with dedup
//! - [`PaginationController`] - scroll-driven "load older" cursor
//! - [`ConversationSession`] - live event handling and the send pipeline
//! - [`AgentDashboard`] - connection lifecycle and ticket requests
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chat_sync::{AgentDashboard, ConnectionManager, ConnectionState, DashboardConfig};
//! use mock_backend::{MockBackend, MockTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), chat_sync::SyncError> {
//!     let transport = MockTransport::new();
//!     let connection = ConnectionManager::new(Arc::new(transport.clone()));
//!     let dashboard = AgentDashboard::new(connection, DashboardConfig::default());
//!
//!     dashboard.start();
//!     dashboard.connection().wait_for_state(ConnectionState::Connected).await;
//!
//!     let session = dashboard.conversation(MockBackend::new().with_history("+15551234567", 3));
//!     session.select("+15551234567").await?;
//!     session.send_agent_message("Hello!").await?;
//!
//!     assert_eq!(session.messages().len(), 4);
//!     dashboard.shutdown();
//!     Ok(())
//! }
//! ```

mod bus;
mod connection;
mod dashboard;
mod error;
mod outbound;
mod pagination;
mod registrar;
mod session;
mod store;

use std::sync::{Mutex, MutexGuard};

pub use bus::{EventBus, Handler, HandlerError, SubscriptionId};
pub use connection::{
    ConnectionManager, ConnectionState, Identity, ReconnectPolicy, Role, DEFAULT_REQUEST_TIMEOUT,
};
pub use dashboard::{AgentDashboard, DashboardActivity, DashboardConfig, DEFAULT_SETTLE_DELAY};
pub use error::SyncError;
pub use outbound::{SendOutcome, SEND_FAILURE_TEXT};
pub use pagination::{Cursor, PageOutcome, PaginationController, ScrollAnchor, LOAD_THRESHOLD, PAGE_SIZE};
pub use registrar::SessionRegistrar;
pub use session::{
    ConversationSession, CustomerUpdate, FormProgress, LoadOutcome, PendingFormStep,
    PendingPrompt, SessionConfig, SessionPhase,
};
pub use store::{chronological, Merge, MergeOutcome, MessageStore, MutationKind};

/// Lock a mutex, taking the data back if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
