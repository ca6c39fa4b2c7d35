//! Mock backend - history, sends and tickets held in memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chat_core::{
    async_trait, BackendError, ChatBackend, ConversationKey, HistoryPage, HistoryQuery,
    MessageRecord, RecordId, SendReceipt, SortOrder, TicketStatus, TicketSummary,
};
use tokio::sync::watch;
use tracing::debug;

use crate::fixtures;

/// A send the backend received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub key: ConversationKey,
    pub text: String,
    pub agent_id: String,
}

#[derive(Debug, Clone)]
enum SendFailure {
    Error(String),
    Rejected(String),
}

#[derive(Default)]
struct State {
    /// Oldest first.
    histories: HashMap<ConversationKey, Vec<MessageRecord>>,
    tickets: HashMap<ConversationKey, Vec<TicketSummary>>,
    fetches: Vec<(ConversationKey, HistoryQuery)>,
    sent: Vec<SentMessage>,
    failing_fetches: u32,
    send_failure: Option<SendFailure>,
}

/// A [`ChatBackend`] serving seeded history.
///
/// History is stored oldest first and paged the way the server does it:
/// a descending query returns the newest rows first, skipping `offset`
/// rows from the newest end.
///
/// Fetches can be held with [`hold_fetches`](Self::hold_fetches) so a test
/// can change state while a fetch is in flight.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
    hold: Arc<watch::Sender<bool>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        let (hold, _) = watch::channel(false);
        Self {
            state: Arc::default(),
            hold: Arc::new(hold),
        }
    }

    /// Seed `count` alternating customer/agent messages, ids `1..=count`.
    pub fn with_history(self, key: impl Into<ConversationKey>, count: usize) -> Self {
        let key = key.into();
        self.lock()
            .histories
            .insert(key, fixtures::history_records(count));
        self
    }

    /// Give the customer an open ticket.
    pub fn with_open_ticket(self, key: impl Into<ConversationKey>) -> Self {
        self.set_ticket(key, TicketStatus::Open);
        self
    }

    /// Replace the customer's tickets with a single ticket in `status`.
    pub fn set_ticket(&self, key: impl Into<ConversationKey>, status: TicketStatus) {
        let ticket = TicketSummary {
            id: RecordId::Number(1),
            status,
            subject: Some("Support request".to_string()),
            priority: None,
        };
        self.lock().tickets.insert(key.into(), vec![ticket]);
    }

    /// Add a record at the newest end of a conversation's history.
    pub fn push_history(&self, key: impl Into<ConversationKey>, record: MessageRecord) {
        self.lock()
            .histories
            .entry(key.into())
            .or_default()
            .push(record);
    }

    /// Make the next `count` history fetches fail.
    pub fn fail_next_fetches(&self, count: u32) {
        self.lock().failing_fetches = count;
    }

    /// Make the next send fail with a transport-level error.
    pub fn fail_next_send(&self) {
        self.lock().send_failure = Some(SendFailure::Error("connection reset".to_string()));
    }

    /// Make the next send answer `success: false`.
    pub fn reject_next_send(&self, reason: impl Into<String>) {
        self.lock().send_failure = Some(SendFailure::Rejected(reason.into()));
    }

    /// Block history fetches until [`release_fetches`](Self::release_fetches).
    pub fn hold_fetches(&self) {
        self.hold.send_replace(true);
    }

    pub fn release_fetches(&self) {
        self.hold.send_replace(false);
    }

    /// Every fetch received so far, in order.
    pub fn fetches(&self) -> Vec<(ConversationKey, HistoryQuery)> {
        self.lock().fetches.clone()
    }

    /// Every send received so far, in order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    fn page(&self, key: &ConversationKey, query: HistoryQuery) -> Vec<MessageRecord> {
        let state = self.lock();
        let rows = match state.histories.get(key) {
            Some(rows) => rows,
            None => return Vec::new(),
        };
        match query.order {
            SortOrder::Descending => rows
                .iter()
                .rev()
                .skip(query.offset)
                .take(query.limit)
                .cloned()
                .collect(),
            SortOrder::Ascending => rows
                .iter()
                .skip(query.offset)
                .take(query.limit)
                .cloned()
                .collect(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn fetch_history(
        &self,
        key: &ConversationKey,
        query: HistoryQuery,
    ) -> Result<HistoryPage, BackendError> {
        {
            let mut state = self.lock();
            state.fetches.push((key.clone(), query));
        }

        let mut held = self.hold.subscribe();
        // The sender lives in self, so this only errors if it was dropped.
        let _ = held.wait_for(|held| !*held).await;

        {
            let mut state = self.lock();
            if state.failing_fetches > 0 {
                state.failing_fetches -= 1;
                return Err(BackendError::Status {
                    status: 500,
                    body: "mock fetch failure".to_string(),
                });
            }
        }

        let items = self.page(key, query);
        debug!(key = %key, offset = query.offset, "Mock history page of {}", items.len());
        Ok(HistoryPage::ok(items))
    }

    async fn send_message(
        &self,
        key: &ConversationKey,
        text: &str,
        agent_id: &str,
    ) -> Result<SendReceipt, BackendError> {
        let mut state = self.lock();
        state.sent.push(SentMessage {
            key: key.clone(),
            text: text.to_string(),
            agent_id: agent_id.to_string(),
        });
        match state.send_failure.take() {
            Some(SendFailure::Error(reason)) => Err(BackendError::Request(reason)),
            Some(SendFailure::Rejected(reason)) => Ok(SendReceipt::rejected(reason)),
            None => Ok(SendReceipt::delivered()),
        }
    }

    async fn fetch_open_tickets(
        &self,
        key: &ConversationKey,
    ) -> Result<Vec<TicketSummary>, BackendError> {
        let state = self.lock();
        Ok(state
            .tickets
            .get(key)
            .map(|tickets| tickets.iter().filter(|t| t.is_open()).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const PHONE: &str = "+15551234567";

    fn ids(page: &HistoryPage) -> Vec<String> {
        page.items
            .iter()
            .filter_map(|r| r.id.as_ref().map(ToString::to_string))
            .collect()
    }

    #[tokio::test]
    async fn test_descending_pages() {
        let backend = MockBackend::new().with_history(PHONE, 35);
        let key = ConversationKey::new(PHONE);

        let first = backend
            .fetch_history(&key, HistoryQuery::latest(30))
            .await
            .unwrap();
        assert_eq!(first.items.len(), 30);
        assert_eq!(ids(&first)[0], "35");

        let older = HistoryQuery {
            offset: 30,
            ..HistoryQuery::latest(30)
        };
        let second = backend.fetch_history(&key, older).await.unwrap();
        assert_eq!(ids(&second), vec!["5", "4", "3", "2", "1"]);
        assert_eq!(backend.fetches().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_empty() {
        let backend = MockBackend::new();
        let page = backend
            .fetch_history(&ConversationKey::new(PHONE), HistoryQuery::latest(30))
            .await
            .unwrap();
        assert!(page.success);
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_failing_fetch() {
        let backend = MockBackend::new().with_history(PHONE, 3);
        backend.fail_next_fetches(1);
        let key = ConversationKey::new(PHONE);

        assert!(backend.fetch_history(&key, HistoryQuery::latest(30)).await.is_err());
        assert!(backend.fetch_history(&key, HistoryQuery::latest(30)).await.is_ok());
    }

    #[tokio::test]
    async fn test_held_fetch_waits_for_release() {
        let backend = MockBackend::new().with_history(PHONE, 3);
        backend.hold_fetches();

        let task = {
            let backend = backend.clone();
            tokio::spawn(async move {
                backend
                    .fetch_history(&ConversationKey::new(PHONE), HistoryQuery::latest(30))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        assert_eq!(backend.fetches().len(), 1);

        backend.release_fetches();
        let page = task.await.unwrap().unwrap();
        assert_eq!(page.items.len(), 3);
    }

    #[tokio::test]
    async fn test_send_failures_apply_once() {
        let backend = MockBackend::new();
        let key = ConversationKey::new(PHONE);

        backend.reject_next_send("no open ticket");
        let receipt = backend.send_message(&key, "hi", "1").await.unwrap();
        assert!(!receipt.success);

        backend.fail_next_send();
        assert!(backend.send_message(&key, "hi", "1").await.is_err());

        assert!(backend.send_message(&key, "hi", "1").await.unwrap().success);
        assert_eq!(backend.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_open_tickets() {
        let backend = MockBackend::new().with_open_ticket(PHONE);
        let key = ConversationKey::new(PHONE);
        assert_eq!(backend.fetch_open_tickets(&key).await.unwrap().len(), 1);

        backend.set_ticket(PHONE, TicketStatus::Closed);
        assert!(backend.fetch_open_tickets(&key).await.unwrap().is_empty());
    }
}
