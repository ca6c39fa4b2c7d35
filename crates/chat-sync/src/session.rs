//! The agent's view of one conversation.
//!
//! A [`ConversationSession`] merges the three message sources of the active
//! conversation into one [`MessageStore`]: history pages fetched from the
//! backend, live events from the connection, and the agent's own sends
//! (see [`outbound`](crate::outbound)).
//!
//! Every result that arrives after an await is checked against the
//! selection it was issued for. Switching conversations bumps a selection
//! epoch, so a late page or send failure for the previous conversation is
//! dropped instead of being merged into the new one.

use std::sync::{Arc, Mutex, MutexGuard};

use chat_core::{
    BackendError, ChatBackend, ClientIntent, ConversationKey, EventKind, IdOrigin, Message,
    MessageRecord, ResponsePayload, SenderKind, ServerEvent,
};
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::bus::{HandlerError, SubscriptionId};
use crate::connection::ConnectionManager;
use crate::error::SyncError;
use crate::lock;
use crate::pagination::{Cursor, PageOutcome, PaginationController, LOAD_THRESHOLD, PAGE_SIZE};
use crate::store::{chronological, Merge, MergeOutcome, MessageStore, MutationKind};

/// Text of the system line that follows a form step prompt.
const FORM_PROMPT_SUFFIX: &str = "Please provide the following information:";

/// Events a session listens to.
const LIVE_EVENTS: [EventKind; 12] = [
    EventKind::ConnectionStatus,
    EventKind::NewCustomerMessage,
    EventKind::NewAgentMessage,
    EventKind::SystemMessage,
    EventKind::InteractiveMessage,
    EventKind::FormStep,
    EventKind::TicketCreated,
    EventKind::TicketUpdated,
    EventKind::CustomerConnected,
    EventKind::CustomerUpdated,
    EventKind::MessagesAcknowledged,
    EventKind::Error,
];

/// Configuration for a conversation session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Agent id sent with every confirmed message.
    pub agent_id: String,

    /// Messages per history page. Default: 30.
    pub page_size: usize,

    /// Scroll distance from the top, in pixels, that loads older messages.
    /// Default: 100.
    pub load_threshold: f64,

    /// Only allow sending while the customer has an open ticket.
    /// Default: false.
    pub require_open_ticket: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            agent_id: "1".to_string(),
            page_size: PAGE_SIZE,
            load_threshold: LOAD_THRESHOLD,
            require_open_ticket: false,
        }
    }
}

impl SessionConfig {
    /// Create a config for the given agent.
    pub fn with_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }
}

/// Interactive prompt waiting for the customer's choice.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPrompt {
    pub header: String,
    pub body: String,
    pub options: Vec<Value>,
}

/// Form step waiting for input.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFormStep {
    pub step: String,
    pub title: String,
    pub fields: Vec<Value>,
}

/// Data collected by the form wizard so far.
#[derive(Debug, Clone, PartialEq)]
pub struct FormProgress {
    pub current_step: String,
    pub data: Map<String, Value>,
}

impl Default for FormProgress {
    fn default() -> Self {
        Self {
            current_step: "initial".to_string(),
            data: Map::new(),
        }
    }
}

/// Customer-level changes reported to the observer.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomerUpdate {
    /// The server processed an acknowledgement of read messages.
    Acknowledged { phone: Option<String>, success: bool },
    /// A customer record changed.
    Updated(Value),
    /// An agent message to this customer was confirmed by the server.
    MessageSent { phone: String },
    /// One of the customer's tickets changed.
    TicketUpdated(ResponsePayload),
}

/// Where the active conversation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    NoConversation,
    LoadingInitial,
    Ready,
    LoadingOlder,
}

/// Result of a history load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A page with this many rows was merged.
    Loaded(usize),
    /// Nothing to do: not near the top, exhausted, already loading, or no
    /// conversation.
    Skipped,
    /// The conversation changed while the page was in flight.
    Stale,
}

type CustomerObserver = Arc<dyn Fn(&CustomerUpdate) + Send + Sync>;

/// The conversation a request was issued for.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Selection {
    pub(crate) epoch: u64,
    pub(crate) key: ConversationKey,
}

#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) epoch: u64,
    pub(crate) store: MessageStore,
    pub(crate) cursor: Option<Cursor>,
    pub(crate) loading_initial: bool,
    pub(crate) online: bool,
    pub(crate) error: Option<String>,
    pub(crate) ticket: Option<Value>,
    pub(crate) has_open_ticket: bool,
    pub(crate) prompt: Option<PendingPrompt>,
    pub(crate) form_step: Option<PendingFormStep>,
    pub(crate) form: FormProgress,
    pub(crate) sending: usize,
}

impl SessionState {
    pub(crate) fn selection(&self) -> Option<Selection> {
        self.store.key().map(|key| Selection {
            epoch: self.epoch,
            key: key.clone(),
        })
    }

    pub(crate) fn is_current(&self, selection: &Selection) -> bool {
        self.epoch == selection.epoch && self.store.key() == Some(&selection.key)
    }

    /// Key of the active conversation if an event for `phone` belongs to
    /// it. Events that name no phone belong to the active conversation.
    fn addressed(&self, phone: Option<&str>) -> Option<ConversationKey> {
        let active = self.store.key()?;
        match phone {
            Some(phone) if !active.matches(phone) => None,
            _ => Some(active.clone()),
        }
    }

    fn reset_conversation(&mut self) {
        self.cursor = None;
        self.loading_initial = false;
        self.error = None;
        self.ticket = None;
        self.has_open_ticket = false;
        self.prompt = None;
        self.form_step = None;
        self.form = FormProgress::default();
    }
}

pub(crate) struct SessionInner<B> {
    pub(crate) backend: B,
    pub(crate) connection: ConnectionManager,
    pub(crate) config: SessionConfig,
    pub(crate) pagination: PaginationController,
    pub(crate) state: Mutex<SessionState>,
    observer: Mutex<Option<CustomerObserver>>,
    subscriptions: Mutex<Vec<(EventKind, SubscriptionId)>>,
}

/// Keeps the active conversation in sync with the backend and the live
/// connection.
///
/// Cloning is cheap; clones share the same state. Live event handlers are
/// removed from the connection when the last clone is dropped.
pub struct ConversationSession<B: ChatBackend + 'static> {
    pub(crate) inner: Arc<SessionInner<B>>,
}

impl<B: ChatBackend + 'static> Clone for ConversationSession<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: ChatBackend + 'static> ConversationSession<B> {
    /// Create a session and subscribe it to live events.
    pub fn new(backend: B, connection: ConnectionManager, config: SessionConfig) -> Self {
        let pagination = PaginationController::new(config.page_size, config.load_threshold);
        let state = SessionState {
            online: connection.is_connected(),
            ..Default::default()
        };
        let inner = Arc::new(SessionInner {
            backend,
            connection: connection.clone(),
            config,
            pagination,
            state: Mutex::new(state),
            observer: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        });

        let subscriptions = LIVE_EVENTS
            .iter()
            .map(|&kind| {
                let weak = Arc::downgrade(&inner);
                let id = connection.subscribe(kind, move |event| match weak.upgrade() {
                    Some(inner) => inner.apply(event),
                    None => Ok(()),
                });
                (kind, id)
            })
            .collect();
        *lock(&inner.subscriptions) = subscriptions;

        Self { inner }
    }

    /// Make `key` the active conversation and load its newest page.
    ///
    /// Any previous conversation's state (cursor, pending prompt, form
    /// progress, ticket) is discarded first.
    pub async fn select(&self, key: impl Into<ConversationKey>) -> Result<LoadOutcome, SyncError> {
        let key = key.into();
        let selection = {
            let mut state = self.inner.lock_state();
            state.epoch += 1;
            state.store.activate(key.clone());
            state.reset_conversation();
            state.cursor = Some(self.inner.pagination.cursor());
            state.loading_initial = true;
            Selection {
                epoch: state.epoch,
                key: key.clone(),
            }
        };
        info!(key = %key, "Opening conversation");

        let query = self.inner.pagination.initial_query();
        let result = fetch_page(&self.inner.backend, &key, query).await;

        let count = {
            let mut state = self.inner.lock_state();
            if !state.is_current(&selection) {
                debug!(key = %key, "Dropping stale initial page");
                return Ok(LoadOutcome::Stale);
            }
            state.loading_initial = false;
            match result {
                Ok(records) => {
                    let count = records.len();
                    let messages = chronological(records, &key, Utc::now());
                    state.store.merge(&key, Merge::Replace(messages));
                    let pager = self.inner.pagination;
                    if let Some(cursor) = state.cursor.as_mut() {
                        pager.complete_initial(cursor, PageOutcome::Loaded(count));
                    }
                    count
                }
                Err(e) => {
                    error!(key = %key, "Failed to load messages: {}", e);
                    state.error = Some("Failed to load messages".to_string());
                    return Err(e);
                }
            }
        };

        if self.inner.config.require_open_ticket {
            if let Err(e) = self.inner.refresh_ticket_gate().await {
                warn!(key = %key, "Could not check open tickets: {}", e);
            }
        }
        if let Err(e) = self.acknowledge().await {
            debug!(key = %key, "Acknowledge skipped: {}", e);
        }

        Ok(LoadOutcome::Loaded(count))
    }

    /// Forget the active conversation.
    pub fn deselect(&self) {
        let mut state = self.inner.lock_state();
        state.epoch += 1;
        state.store.clear();
        state.reset_conversation();
    }

    /// Load the next older page if the reader scrolled near the top.
    pub async fn load_older(&self, distance_from_top: f64) -> Result<LoadOutcome, SyncError> {
        let pager = self.inner.pagination;
        let (selection, query) = {
            let mut state = self.inner.lock_state();
            let Some(selection) = state.selection() else {
                return Ok(LoadOutcome::Skipped);
            };
            let Some(cursor) = state.cursor.as_mut() else {
                return Ok(LoadOutcome::Skipped);
            };
            let Some(query) = pager.maybe_load_older(cursor, distance_from_top) else {
                return Ok(LoadOutcome::Skipped);
            };
            state.error = None;
            (selection, query)
        };

        let result = fetch_page(&self.inner.backend, &selection.key, query).await;

        let mut state = self.inner.lock_state();
        if !state.is_current(&selection) {
            debug!(key = %selection.key, "Dropping stale page at offset {}", query.offset);
            return Ok(LoadOutcome::Stale);
        }
        let outcome = match &result {
            Ok(records) => PageOutcome::Loaded(records.len()),
            Err(_) => PageOutcome::Failed,
        };
        if let Some(cursor) = state.cursor.as_mut() {
            pager.complete(cursor, query, outcome);
        }

        match result {
            Ok(records) => {
                let count = records.len();
                let messages = chronological(records, &selection.key, Utc::now());
                state.store.merge(&selection.key, Merge::Prepend(messages));
                debug!(key = %selection.key, "Prepended {} older messages", count);
                Ok(LoadOutcome::Loaded(count))
            }
            Err(e) => {
                error!(key = %selection.key, "Failed to load older messages: {}", e);
                state.error = Some("Failed to load older messages".to_string());
                Err(e)
            }
        }
    }

    /// Tell the server the agent has seen the conversation.
    pub async fn acknowledge(&self) -> Result<(), SyncError> {
        let key = self.active_key().ok_or(SyncError::NoConversation)?;
        self.inner
            .connection
            .emit(ClientIntent::AcknowledgeMessages {
                phone_number: key.to_string(),
            })
            .await
    }

    /// Re-check whether the customer has an open ticket.
    pub async fn refresh_ticket_gate(&self) -> Result<bool, SyncError> {
        self.inner.refresh_ticket_gate().await
    }

    /// Observe customer-level updates.
    pub fn on_customer_update<F>(&self, observer: F)
    where
        F: Fn(&CustomerUpdate) + Send + Sync + 'static,
    {
        *lock(&self.inner.observer) = Some(Arc::new(observer));
    }

    /// Messages of the active conversation, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock_state().store.messages().to_vec()
    }

    pub fn active_key(&self) -> Option<ConversationKey> {
        self.inner.lock_state().store.key().cloned()
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.inner.lock_state().cursor
    }

    pub fn phase(&self) -> SessionPhase {
        let state = self.inner.lock_state();
        if state.store.key().is_none() {
            SessionPhase::NoConversation
        } else if state.loading_initial {
            SessionPhase::LoadingInitial
        } else if state.cursor.is_some_and(|c| c.is_loading_more) {
            SessionPhase::LoadingOlder
        } else {
            SessionPhase::Ready
        }
    }

    /// Consume the kind of the last change to the collection.
    pub fn take_last_mutation(&self) -> Option<MutationKind> {
        self.inner.lock_state().store.take_last_mutation()
    }

    /// Current error indicator, if any.
    pub fn error(&self) -> Option<String> {
        self.inner.lock_state().error.clone()
    }

    pub fn clear_error(&self) {
        self.inner.lock_state().error = None;
    }

    pub fn is_online(&self) -> bool {
        self.inner.lock_state().online
    }

    pub fn is_sending(&self) -> bool {
        self.inner.lock_state().sending > 0
    }

    pub fn has_open_ticket(&self) -> bool {
        self.inner.lock_state().has_open_ticket
    }

    /// Ticket the conversation is attached to, as the server sent it.
    pub fn current_ticket(&self) -> Option<Value> {
        self.inner.lock_state().ticket.clone()
    }

    pub fn pending_prompt(&self) -> Option<PendingPrompt> {
        self.inner.lock_state().prompt.clone()
    }

    pub fn pending_form_step(&self) -> Option<PendingFormStep> {
        self.inner.lock_state().form_step.clone()
    }

    pub fn form_progress(&self) -> FormProgress {
        self.inner.lock_state().form.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }
}

impl<B: ChatBackend + 'static> SessionInner<B> {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.state)
    }

    async fn refresh_ticket_gate(&self) -> Result<bool, SyncError> {
        let selection = self
            .lock_state()
            .selection()
            .ok_or(SyncError::NoConversation)?;
        let tickets = self.backend.fetch_open_tickets(&selection.key).await?;
        let open = !tickets.is_empty();

        let mut state = self.lock_state();
        if state.is_current(&selection) {
            state.has_open_ticket = open;
            debug!(key = %selection.key, open, "Ticket gate refreshed");
        }
        Ok(open)
    }

    /// Apply one live event.
    fn apply(self: &Arc<Self>, event: &ServerEvent) -> Result<(), HandlerError> {
        match event {
            ServerEvent::ConnectionStatus(status) => {
                let mut state = self.lock_state();
                state.online = status.connected;
                if let Some(reason) = &status.error {
                    state.error = Some(format!("Connection lost: {}", reason));
                }
                return Ok(());
            }
            ServerEvent::MessagesAcknowledged(ack) => {
                self.notify(CustomerUpdate::Acknowledged {
                    phone: ack.phone_number.clone(),
                    success: ack.success,
                });
                return Ok(());
            }
            ServerEvent::CustomerUpdated(customer) => {
                self.notify(CustomerUpdate::Updated(customer.clone()));
                return Ok(());
            }
            ServerEvent::TicketUpdated(ticket) => {
                self.spawn_ticket_refresh();
                self.notify(CustomerUpdate::TicketUpdated(ticket.clone()));
                return Ok(());
            }
            ServerEvent::NewCustomerMessage(e) if e.message.is_none() => {
                debug!("Ignoring newCustomerMessage without a message");
                return Ok(());
            }
            ServerEvent::NewCustomerMessage(e) if e.phone().is_none() => {
                return Err("newCustomerMessage without a phone number".into());
            }
            _ => {}
        }

        let mut state = self.lock_state();
        if let ServerEvent::Error(e) = event {
            warn!("Server error: {}", e.message);
            state.error = Some(e.message.clone());
        }
        let Some(key) = state.addressed(event.phone()) else {
            debug!("Ignoring {} for another conversation", event.kind());
            return Ok(());
        };

        let now = Utc::now();
        let pushed_id = || IdOrigin::Server.generate(now);
        let message = match event {
            ServerEvent::NewCustomerMessage(e) => {
                let Some(record) = e.message.clone() else {
                    return Ok(());
                };
                record.into_message(&key, IdOrigin::Server, SenderKind::Customer, now)
            }
            ServerEvent::NewAgentMessage(e) => {
                let mut message =
                    e.message
                        .clone()
                        .into_message(&key, IdOrigin::Server, SenderKind::Agent, now);
                message.sender = SenderKind::Agent;
                message
            }
            ServerEvent::SystemMessage(e) => {
                Message::new(&key, SenderKind::System, e.message.clone(), now).with_id(pushed_id())
            }
            ServerEvent::InteractiveMessage(prompt) => {
                state.prompt = Some(PendingPrompt {
                    header: prompt.header.clone(),
                    body: prompt.body.clone(),
                    options: prompt.buttons.clone(),
                });
                let text = format!("{}\n\n{}", prompt.header, prompt.body);
                Message::new(&key, SenderKind::System, text, now)
                    .with_id(pushed_id())
                    .with_interactive(prompt.buttons.clone())
            }
            ServerEvent::FormStep(step) => {
                let fields = step.requested_fields();
                state.form.current_step = step.step.clone();
                state.form_step = Some(PendingFormStep {
                    step: step.step.clone(),
                    title: step.title.clone(),
                    fields: fields.clone(),
                });
                let text = format!("{}\n\n{}", step.title, FORM_PROMPT_SUFFIX);
                Message::new(&key, SenderKind::System, text, now)
                    .with_id(pushed_id())
                    .with_form(fields)
            }
            ServerEvent::TicketCreated(created) => {
                state.ticket = created.ticket.clone();
                state.has_open_ticket = true;
                state.prompt = None;
                state.form_step = None;
                state.form = FormProgress::default();
                info!(key = %key, "Ticket created");
                Message::new(&key, SenderKind::System, format!("✅ {}", created.message), now)
                    .with_id(pushed_id())
            }
            ServerEvent::CustomerConnected(connected) => {
                state.ticket = connected.existing_ticket.clone();
                if state.ticket.is_some() {
                    state.has_open_ticket = true;
                }
                return Ok(());
            }
            ServerEvent::Error(e) => {
                Message::error_marker(&key, format!("Error: {}", e.message), now)
            }
            other => {
                debug!("No session handling for {}", other.kind());
                return Ok(());
            }
        };

        match state.store.merge(&key, Merge::Append(message)) {
            MergeOutcome::Applied { .. } => debug!(key = %key, "Appended {}", event.kind()),
            MergeOutcome::Duplicate => debug!(key = %key, "Duplicate {} skipped", event.kind()),
            MergeOutcome::Stale => debug!(key = %key, "Stale {} dropped", event.kind()),
        }
        Ok(())
    }

    pub(crate) fn notify(&self, update: CustomerUpdate) {
        let observer = lock(&self.observer).clone();
        if let Some(observer) = observer {
            observer(&update);
        }
    }

    fn spawn_ticket_refresh(self: &Arc<Self>) {
        if self.lock_state().store.key().is_none() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to refresh the ticket gate on");
            return;
        };
        let inner = self.clone();
        runtime.spawn(async move {
            if let Err(e) = inner.refresh_ticket_gate().await {
                warn!("Ticket gate refresh failed: {}", e);
            }
        });
    }
}

impl<B> Drop for SessionInner<B> {
    fn drop(&mut self) {
        let subscriptions = std::mem::take(&mut *lock(&self.subscriptions));
        for (kind, id) in subscriptions {
            self.connection.unsubscribe(kind, id);
        }
    }
}

/// Fetch one page, treating `success: false` as a failure.
async fn fetch_page<B: ChatBackend>(
    backend: &B,
    key: &ConversationKey,
    query: chat_core::HistoryQuery,
) -> Result<Vec<MessageRecord>, SyncError> {
    let page = backend.fetch_history(key, query).await?;
    if !page.success {
        return Err(SyncError::Fetch(BackendError::Rejected(
            "history page marked unsuccessful".to_string(),
        )));
    }
    Ok(page.items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionState, ReconnectPolicy};
    use chat_core::{
        FormStepEvent, InteractivePrompt, ServerError, SystemMessageEvent, TicketCreatedEvent,
    };
    use mock_backend::{fixtures, MockBackend, MockTransport};
    use serde_json::json;
    use std::time::Duration;

    const PHONE: &str = "+15551234567";

    async fn setup(backend: MockBackend) -> (MockTransport, ConversationSession<MockBackend>) {
        let transport = MockTransport::new();
        let connection = ConnectionManager::with_policy(
            Arc::new(transport.clone()),
            ReconnectPolicy::new(3, Duration::from_millis(10)),
        );
        connection.connect();
        connection.wait_for_state(ConnectionState::Connected).await;
        let session = ConversationSession::new(backend, connection, SessionConfig::default());
        (transport, session)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn texts(session: &ConversationSession<MockBackend>) -> Vec<String> {
        session.messages().into_iter().map(|m| m.text).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_loads_newest_page_in_order() {
        let (transport, session) = setup(MockBackend::new().with_history(PHONE, 3)).await;

        let outcome = session.select(PHONE).await.unwrap();

        assert_eq!(outcome, LoadOutcome::Loaded(3));
        assert_eq!(texts(&session), vec!["message 1", "message 2", "message 3"]);
        assert_eq!(session.take_last_mutation(), Some(MutationKind::Replace));
        assert!(!session.cursor().unwrap().has_more);
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(transport.emitted_named("acknowledgeMessages").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_failure_sets_error() {
        let backend = MockBackend::new().with_history(PHONE, 3);
        backend.fail_next_fetches(1);
        let (_transport, session) = setup(backend).await;

        assert!(matches!(session.select(PHONE).await, Err(SyncError::Fetch(_))));
        assert!(session.messages().is_empty());
        assert_eq!(session.error().as_deref(), Some("Failed to load messages"));
        assert!(session.cursor().unwrap().has_more);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_messages_for_other_conversation_are_ignored() {
        let (transport, session) = setup(MockBackend::new()).await;
        session.select(PHONE).await.unwrap();

        transport.push(fixtures::customer_message("+1999", 1, "elsewhere", Utc::now()));
        transport.push(fixtures::customer_message(PHONE, 2, "here", Utc::now()));
        settle().await;

        assert_eq!(texts(&session), vec!["here"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_without_phone_targets_active_conversation() {
        let (transport, session) = setup(MockBackend::new()).await;
        session.select(PHONE).await.unwrap();

        transport.push(ServerEvent::SystemMessage(SystemMessageEvent {
            phone_number: None,
            message: "Agent joined the conversation".to_string(),
        }));
        settle().await;

        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, SenderKind::System);
        assert!(messages[0].id.starts_with("srv_"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_conversation_drops_live_messages() {
        let (transport, session) = setup(MockBackend::new()).await;
        transport.push(fixtures::customer_message(PHONE, 1, "hi", Utc::now()));
        settle().await;
        assert!(session.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interactive_prompt() {
        let (transport, session) = setup(MockBackend::new()).await;
        session.select(PHONE).await.unwrap();

        transport.push(ServerEvent::InteractiveMessage(InteractivePrompt {
            phone_number: Some(PHONE.to_string()),
            header: "Support".to_string(),
            body: "What do you need?".to_string(),
            buttons: vec![json!({"id": "billing", "title": "Billing"})],
        }));
        settle().await;

        let messages = session.messages();
        assert_eq!(messages[0].text, "Support\n\nWhat do you need?");
        assert_eq!(messages[0].interactive.as_ref().unwrap().len(), 1);
        assert_eq!(session.pending_prompt().unwrap().header, "Support");
    }

    #[tokio::test(start_paused = true)]
    async fn test_form_step_and_ticket_created() {
        let (transport, session) = setup(MockBackend::new()).await;
        session.select(PHONE).await.unwrap();

        transport.push(ServerEvent::FormStep(FormStepEvent {
            phone_number: None,
            step: "contact".to_string(),
            title: "Contact details".to_string(),
            fields: None,
            field: Some(json!({"name": "email"})),
        }));
        settle().await;

        assert_eq!(
            session.messages()[0].text,
            "Contact details\n\nPlease provide the following information:"
        );
        assert_eq!(session.form_progress().current_step, "contact");
        assert_eq!(session.pending_form_step().unwrap().fields.len(), 1);

        transport.push(ServerEvent::TicketCreated(TicketCreatedEvent {
            phone_number: Some(PHONE.to_string()),
            ticket: Some(json!({"id": 7})),
            message: "Ticket #7 created".to_string(),
        }));
        settle().await;

        assert_eq!(session.messages()[1].text, "✅ Ticket #7 created");
        assert!(session.pending_form_step().is_none());
        assert_eq!(session.form_progress(), FormProgress::default());
        assert_eq!(session.current_ticket(), Some(json!({"id": 7})));
        assert!(session.has_open_ticket());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_sets_indicator_and_line() {
        let (transport, session) = setup(MockBackend::new()).await;
        session.select(PHONE).await.unwrap();

        transport.push(ServerEvent::Error(ServerError {
            message: "Ticket not found".to_string(),
        }));
        settle().await;

        assert_eq!(session.error().as_deref(), Some("Ticket not found"));
        let messages = session.messages();
        assert_eq!(messages[0].text, "Error: Ticket not found");
        assert_eq!(messages[0].sender, SenderKind::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledgement_reaches_observer() {
        let (transport, session) = setup(MockBackend::new()).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            session.on_customer_update(move |update| seen.lock().unwrap().push(update.clone()));
        }

        transport.push(ServerEvent::MessagesAcknowledged(
            chat_core::MessagesAcknowledged {
                phone_number: Some(PHONE.to_string()),
                success: true,
            },
        ));
        settle().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![CustomerUpdate::Acknowledged {
                phone: Some(PHONE.to_string()),
                success: true
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_customer_message_without_body_is_ignored() {
        let (transport, session) = setup(MockBackend::new()).await;
        session.select(PHONE).await.unwrap();

        transport.push(ServerEvent::NewCustomerMessage(chat_core::CustomerMessageEvent {
            phone_number: Some(PHONE.to_string()),
            customer: None,
            message: None,
        }));
        settle().await;

        assert!(session.messages().is_empty());
        assert_eq!(session.take_last_mutation(), Some(MutationKind::Replace));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticket_update_refreshes_gate_and_notifies() {
        let backend = MockBackend::new();
        let (transport, session) = setup(backend.clone()).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            session.on_customer_update(move |update| seen.lock().unwrap().push(update.clone()));
        }
        session.select(PHONE).await.unwrap();
        assert!(!session.has_open_ticket());

        backend.set_ticket(PHONE, chat_core::TicketStatus::InProgress);
        let mut body = Map::new();
        body.insert("id".to_string(), json!("T-1"));
        body.insert("status".to_string(), json!("in_progress"));
        let payload = ResponsePayload {
            request_id: None,
            body,
        };
        transport.push(ServerEvent::TicketUpdated(payload.clone()));
        settle().await;

        assert!(session.has_open_ticket());
        assert_eq!(*seen.lock().unwrap(), vec![CustomerUpdate::TicketUpdated(payload)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_session_unsubscribes() {
        let (_transport, session) = setup(MockBackend::new()).await;
        let connection = session.connection().clone();
        assert_eq!(connection.handler_count(EventKind::NewCustomerMessage), 1);

        drop(session);
        assert_eq!(connection.handler_count(EventKind::NewCustomerMessage), 0);
    }
}
