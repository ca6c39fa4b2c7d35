//! Delayed backend - wraps another backend with artificial latency.

use std::time::Duration;

use chat_core::{
    async_trait, BackendError, ChatBackend, ConversationKey, HistoryPage, HistoryQuery,
    SendReceipt, TicketSummary,
};
use tokio::time::sleep;

/// A backend that wraps another backend and delays every call.
///
/// Useful for testing in-flight state: loading flags, overlapping sends and
/// conversation switches that race a fetch.
pub struct DelayedBackend<B: ChatBackend> {
    inner: B,
    delay: Duration,
}

impl<B: ChatBackend> DelayedBackend<B> {
    pub fn new(inner: B, delay: Duration) -> Self {
        Self { inner, delay }
    }

    /// Create a backend with a delay in milliseconds.
    pub fn with_millis(inner: B, millis: u64) -> Self {
        Self::new(inner, Duration::from_millis(millis))
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: ChatBackend> ChatBackend for DelayedBackend<B> {
    async fn fetch_history(
        &self,
        key: &ConversationKey,
        query: HistoryQuery,
    ) -> Result<HistoryPage, BackendError> {
        sleep(self.delay).await;
        self.inner.fetch_history(key, query).await
    }

    async fn send_message(
        &self,
        key: &ConversationKey,
        text: &str,
        agent_id: &str,
    ) -> Result<SendReceipt, BackendError> {
        sleep(self.delay).await;
        self.inner.send_message(key, text, agent_id).await
    }

    async fn fetch_open_tickets(
        &self,
        key: &ConversationKey,
    ) -> Result<Vec<TicketSummary>, BackendError> {
        sleep(self.delay).await;
        self.inner.fetch_open_tickets(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockBackend;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_delayed_fetch() {
        let backend = DelayedBackend::with_millis(MockBackend::new().with_history("+1", 2), 250);

        let start = Instant::now();
        let page = backend
            .fetch_history(&ConversationKey::new("+1"), HistoryQuery::latest(30))
            .await
            .unwrap();

        assert_eq!(page.items.len(), 2);
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(backend.inner().fetches().len(), 1);
    }
}
