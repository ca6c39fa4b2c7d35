//! Outbound send pipeline.
//!
//! Agent messages are echoed into the collection immediately with a
//! `temp_` id, then confirmed through the backend. The server later pushes
//! the stored message as `newAgentMessage`; it carries the same text within
//! the duplicate window, so the store drops it. A failed confirmation leaves
//! the echo in place and appends an error line after it.

use chat_core::{ChatBackend, ClientIntent, Message, SenderKind};
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::error::SyncError;
use crate::session::{ConversationSession, CustomerUpdate};
use crate::store::Merge;

/// Text of the error line appended when a send is not confirmed.
pub const SEND_FAILURE_TEXT: &str = "Failed to send message";

/// Result of a send request that raised no error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The server confirmed the message; `echo_id` is the local echo's id.
    Sent { echo_id: String },
    /// Nothing was sent: blank text or no active conversation.
    Skipped,
}

impl<B: ChatBackend + 'static> ConversationSession<B> {
    /// Send an agent message to the active conversation.
    pub async fn send_agent_message(&self, text: &str) -> Result<SendOutcome, SyncError> {
        let text = text.trim();
        if text.is_empty() {
            debug!("Not sending blank message");
            return Ok(SendOutcome::Skipped);
        }

        let (selection, echo_id) = {
            let mut state = self.inner.lock_state();
            let Some(selection) = state.selection() else {
                debug!("Not sending: no active conversation");
                return Ok(SendOutcome::Skipped);
            };
            let echo = Message::optimistic(&selection.key, text, Utc::now());
            let echo_id = echo.id.clone();
            state.store.merge(&selection.key, Merge::Append(echo));
            state.sending += 1;
            state.error = None;
            (selection, echo_id)
        };
        info!(key = %selection.key, "Sending agent message");

        let failure = match self
            .inner
            .backend
            .send_message(&selection.key, text, &self.inner.config.agent_id)
            .await
        {
            Ok(receipt) if receipt.success => None,
            Ok(receipt) => Some(
                receipt
                    .error
                    .unwrap_or_else(|| "server rejected the message".to_string()),
            ),
            Err(e) => Some(e.to_string()),
        };

        let mut state = self.inner.lock_state();
        state.sending = state.sending.saturating_sub(1);
        let Some(reason) = failure else {
            drop(state);
            debug!(key = %selection.key, id = %echo_id, "Send confirmed");
            self.inner.notify(CustomerUpdate::MessageSent {
                phone: selection.key.to_string(),
            });
            return Ok(SendOutcome::Sent { echo_id });
        };

        error!(key = %selection.key, "Send failed: {}", reason);
        if state.is_current(&selection) {
            let marker = Message::error_marker(&selection.key, SEND_FAILURE_TEXT, Utc::now());
            state.store.merge(&selection.key, Merge::Append(marker));
            state.error = Some(SEND_FAILURE_TEXT.to_string());
        } else {
            debug!(key = %selection.key, "Conversation changed; failure line dropped");
        }
        Err(SyncError::Send(reason))
    }

    /// Answer the pending interactive prompt on the customer's behalf.
    pub async fn respond_to_interactive(
        &self,
        option_id: &str,
        option_label: &str,
    ) -> Result<(), SyncError> {
        {
            let mut state = self.inner.lock_state();
            let key = state.store.key().cloned().ok_or(SyncError::NoConversation)?;
            let line = Message::new(
                &key,
                SenderKind::Customer,
                format!("Selected: {}", option_label),
                Utc::now(),
            );
            state.store.merge(&key, Merge::Append(line));
            state.prompt = None;
        }

        self.inner
            .connection
            .emit(ClientIntent::InteractiveResponse {
                button_id: option_id.to_string(),
                button_title: option_label.to_string(),
            })
            .await
    }

    /// Submit data for the pending form step.
    pub async fn submit_form_step(&self, data: Map<String, Value>) -> Result<(), SyncError> {
        let step = {
            let mut state = self.inner.lock_state();
            let key = state.store.key().cloned().ok_or(SyncError::NoConversation)?;
            let pending = state
                .form_step
                .take()
                .ok_or_else(|| SyncError::Protocol("no form step is pending".to_string()))?;

            let line = Message::new(&key, SenderKind::Customer, describe_form_data(&data), Utc::now());
            state.store.merge(&key, Merge::Append(line));
            state.form.current_step = pending.step.clone();
            state
                .form
                .data
                .extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
            pending.step
        };

        info!(step = %step, "Submitting form step");
        self.inner
            .connection
            .emit(ClientIntent::FormStepComplete {
                step,
                step_data: data,
            })
            .await
    }

    /// Whether the agent may send right now: a conversation is open, the
    /// connection is up and, when required, the customer has an open ticket.
    pub fn can_send(&self) -> bool {
        let state = self.inner.lock_state();
        state.store.key().is_some()
            && state.online
            && (!self.inner.config.require_open_ticket || state.has_open_ticket)
    }
}

/// `"k: v, k: v"`, with strings unquoted.
fn describe_form_data(data: &Map<String, Value>) -> String {
    data.iter()
        .map(|(key, value)| match value {
            Value::String(s) => format!("{}: {}", key, s),
            other => format!("{}: {}", key, other),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionManager, ConnectionState, ReconnectPolicy};
    use crate::session::SessionConfig;
    use chat_core::{FormStepEvent, ServerEvent};
    use mock_backend::{fixtures, DelayedBackend, MockBackend, MockTransport};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const PHONE: &str = "+15551234567";

    async fn setup<B: ChatBackend + 'static>(
        backend: B,
        config: SessionConfig,
    ) -> (MockTransport, ConversationSession<B>) {
        let transport = MockTransport::new();
        let connection = ConnectionManager::with_policy(
            Arc::new(transport.clone()),
            ReconnectPolicy::new(3, Duration::from_millis(10)),
        );
        connection.connect();
        connection.wait_for_state(ConnectionState::Connected).await;
        (transport, ConversationSession::new(backend, connection, config))
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_or_unselected_send_is_noop() {
        let backend = MockBackend::new();
        let (_transport, session) = setup(backend.clone(), SessionConfig::default()).await;

        assert_eq!(session.send_agent_message("hi").await.unwrap(), SendOutcome::Skipped);
        session.select(PHONE).await.unwrap();
        assert_eq!(session.send_agent_message("   ").await.unwrap(), SendOutcome::Skipped);
        assert!(backend.sent().is_empty());
        assert!(session.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_send_keeps_single_echo() {
        let backend = MockBackend::new();
        let (transport, session) = setup(backend.clone(), SessionConfig::with_agent("7")).await;
        session.select(PHONE).await.unwrap();

        let outcome = session.send_agent_message("Hello").await.unwrap();
        let SendOutcome::Sent { echo_id } = outcome else {
            panic!("expected a confirmed send");
        };
        assert!(echo_id.starts_with("temp_"));
        assert_eq!(backend.sent()[0].agent_id, "7");

        transport.push(fixtures::agent_message(PHONE, 501, "Hello", Utc::now()));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, echo_id);
        assert_eq!(messages[0].sender, SenderKind::Agent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_appends_error_marker() {
        let backend = MockBackend::new();
        backend.fail_next_send();
        let (_transport, session) = setup(backend, SessionConfig::default()).await;
        session.select(PHONE).await.unwrap();

        let result = session.send_agent_message("Hello").await;
        assert!(matches!(result, Err(SyncError::Send(_))));

        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].id.starts_with("temp_"));
        assert_eq!(messages[1].text, SEND_FAILURE_TEXT);
        assert_eq!(messages[1].sender, SenderKind::Error);
        assert!(messages[1].id.starts_with("error_"));
        assert_eq!(session.error().as_deref(), Some(SEND_FAILURE_TEXT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_send_clears_previous_error() {
        let backend = MockBackend::new();
        backend.fail_next_send();
        let (_transport, session) = setup(backend, SessionConfig::default()).await;
        session.select(PHONE).await.unwrap();

        assert!(session.send_agent_message("Hello").await.is_err());
        assert!(session.error().is_some());

        session.send_agent_message("Hello again").await.unwrap();
        assert!(session.error().is_none());
        assert_eq!(session.messages().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_send_notifies_observer() {
        let backend = MockBackend::new();
        backend.reject_next_send("no open ticket");
        let (_transport, session) = setup(backend, SessionConfig::default()).await;
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            session.on_customer_update(move |update| seen.lock().unwrap().push(update.clone()));
        }
        session.select(PHONE).await.unwrap();

        assert!(session.send_agent_message("Hello").await.is_err());
        assert!(seen.lock().unwrap().is_empty());

        session.send_agent_message("Hello again").await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![CustomerUpdate::MessageSent {
                phone: PHONE.to_string()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_send_is_a_failure() {
        let backend = MockBackend::new();
        backend.reject_next_send("no open ticket");
        let (_transport, session) = setup(backend, SessionConfig::default()).await;
        session.select(PHONE).await.unwrap();

        let result = session.send_agent_message("Hello").await;
        assert!(matches!(result, Err(SyncError::Send(reason)) if reason == "no open ticket"));
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_switch_is_dropped() {
        let mock = MockBackend::new();
        mock.fail_next_send();
        let (_transport, session) =
            setup(DelayedBackend::with_millis(mock, 200), SessionConfig::default()).await;
        session.select(PHONE).await.unwrap();

        let sending = {
            let session = session.clone();
            tokio::spawn(async move { session.send_agent_message("Hello").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(session.is_sending());
        session.select("+1999").await.unwrap();

        assert!(sending.await.unwrap().is_err());
        assert!(session.messages().is_empty());
        assert!(session.error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_respond_to_interactive() {
        let (transport, session) = setup(MockBackend::new(), SessionConfig::default()).await;
        session.select(PHONE).await.unwrap();

        session.respond_to_interactive("billing", "Billing").await.unwrap();

        assert_eq!(session.messages()[0].text, "Selected: Billing");
        assert_eq!(session.messages()[0].sender, SenderKind::Customer);
        assert_eq!(
            transport.emitted_named("interactiveResponse"),
            vec![ClientIntent::InteractiveResponse {
                button_id: "billing".to_string(),
                button_title: "Billing".to_string(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_form_step() {
        let (transport, session) = setup(MockBackend::new(), SessionConfig::default()).await;
        session.select(PHONE).await.unwrap();

        let mut data = Map::new();
        data.insert("email".to_string(), json!("ana@example.com"));
        assert!(matches!(
            session.submit_form_step(data.clone()).await,
            Err(SyncError::Protocol(_))
        ));

        transport.push(ServerEvent::FormStep(FormStepEvent {
            phone_number: Some(PHONE.to_string()),
            step: "contact".to_string(),
            title: "Contact".to_string(),
            fields: Some(vec![json!({"name": "email"})]),
            field: None,
        }));
        tokio::time::sleep(Duration::from_millis(10)).await;

        data.insert("age".to_string(), json!(31));
        session.submit_form_step(data).await.unwrap();

        let messages = session.messages();
        assert_eq!(messages.last().unwrap().text, "age: 31, email: ana@example.com");
        assert_eq!(session.form_progress().data.len(), 2);
        assert!(session.pending_form_step().is_none());
        assert_eq!(transport.emitted_named("formStepComplete").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_can_send_requires_open_ticket_when_configured() {
        let backend = MockBackend::new();
        let config = SessionConfig {
            require_open_ticket: true,
            ..SessionConfig::default()
        };
        let (_transport, session) = setup(backend.clone(), config).await;

        assert!(!session.can_send());
        session.select(PHONE).await.unwrap();
        assert!(!session.can_send());

        backend.set_ticket(PHONE, chat_core::TicketStatus::InProgress);
        assert!(session.refresh_ticket_gate().await.unwrap());
        assert!(session.can_send());
    }

    #[test]
    fn test_describe_form_data() {
        let mut data = Map::new();
        data.insert("name".to_string(), json!("Ana"));
        data.insert("urgent".to_string(), json!(true));
        assert_eq!(describe_form_data(&data), "name: Ana, urgent: true");
    }
}
