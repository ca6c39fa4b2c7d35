//! Typed server-to-client events.
//!
//! Every event name the server pushes maps to exactly one [`ServerEvent`]
//! variant with a fixed payload shape. Parts of a payload the engine never
//! interprets (ticket bodies, button metadata, customer records) stay as
//! [`serde_json::Value`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::message::MessageRecord;

/// Connection health, published locally by the connection manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionStatus {
    pub fn up() -> Self {
        Self {
            connected: true,
            error: None,
        }
    }

    pub fn down(error: Option<String>) -> Self {
        Self {
            connected: false,
            error,
        }
    }
}

/// Minimal view of a customer record embedded in events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerRef {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `newCustomerMessage`: a customer (or the server on their behalf) wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerMessageEvent {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub customer: Option<CustomerRef>,
    #[serde(default)]
    pub message: Option<MessageRecord>,
}

impl CustomerMessageEvent {
    /// Phone of the conversation, from the event or its customer record.
    pub fn phone(&self) -> Option<&str> {
        self.phone_number.as_deref().or_else(|| {
            self.customer
                .as_ref()
                .and_then(|c| c.phone_number.as_deref())
        })
    }
}

/// `newAgentMessage`: an agent message was stored server-side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMessageEvent {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub message: MessageRecord,
}

/// `systemMessage`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMessageEvent {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// `interactiveMessage`: a prompt with selectable buttons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractivePrompt {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub buttons: Vec<Value>,
}

/// `formStep`: the server asks for one step of a form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormStepEvent {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub step: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub fields: Option<Vec<Value>>,
    #[serde(default)]
    pub field: Option<Value>,
}

impl FormStepEvent {
    /// Requested fields: `fields` when present, else the single `field`.
    pub fn requested_fields(&self) -> Vec<Value> {
        match (&self.fields, &self.field) {
            (Some(fields), _) => fields.clone(),
            (None, Some(field)) => vec![field.clone()],
            (None, None) => Vec::new(),
        }
    }
}

/// `ticketCreated`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketCreatedEvent {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub ticket: Option<Value>,
    #[serde(default)]
    pub message: String,
}

/// `messagesAcknowledged`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagesAcknowledged {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub success: bool,
}

/// `error`: the server reports a failure for this session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub message: String,
}

/// `customerConnected`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerConnected {
    #[serde(default)]
    pub customer: Option<CustomerRef>,
    #[serde(default)]
    pub existing_ticket: Option<Value>,
}

/// `agentConnected`: the server accepted an agent identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConnected {
    pub agent_id: Value,
}

/// Payload of a response to a [`SocketRequest`](crate::SocketRequest).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    #[serde(default, rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

/// An event pushed by the server (or, for [`ServerEvent::ConnectionStatus`],
/// by the connection manager itself).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    ConnectionStatus(ConnectionStatus),
    CustomerConnected(CustomerConnected),
    AgentConnected(AgentConnected),
    AgentJoined(Value),
    AgentLeft(Value),
    NewCustomerMessage(CustomerMessageEvent),
    NewAgentMessage(AgentMessageEvent),
    SystemMessage(SystemMessageEvent),
    InteractiveMessage(InteractivePrompt),
    FormStep(FormStepEvent),
    TicketCreated(TicketCreatedEvent),
    TicketUpdated(ResponsePayload),
    NewTicketCreated(Value),
    TicketEscalated(Value),
    NewCustomer(Value),
    CustomerUpdated(Value),
    DashboardStatsUpdated(Value),
    AgentActionCompleted(Value),
    MessagesAcknowledged(MessagesAcknowledged),
    Error(ServerError),
    TicketsResponse(ResponsePayload),
    TicketResponse(ResponsePayload),
    TicketMessagesResponse(ResponsePayload),
    MessageSent(ResponsePayload),
    TicketAssigned(ResponsePayload),
    TicketClosed(ResponsePayload),
}

impl ServerEvent {
    /// Decode one wire frame: event name plus JSON payload.
    pub fn from_frame(name: &str, data: &str) -> Result<Self, serde_json::Error> {
        let data: Value = if data.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(data)?
        };
        serde_json::from_value(json!({ "event": name, "data": data }))
    }

    /// Encode into a wire frame.
    pub fn to_frame(&self) -> Result<(String, String), serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        let data = value
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok((self.kind().as_str().to_string(), serde_json::to_string(&data)?))
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::ConnectionStatus(_) => EventKind::ConnectionStatus,
            ServerEvent::CustomerConnected(_) => EventKind::CustomerConnected,
            ServerEvent::AgentConnected(_) => EventKind::AgentConnected,
            ServerEvent::AgentJoined(_) => EventKind::AgentJoined,
            ServerEvent::AgentLeft(_) => EventKind::AgentLeft,
            ServerEvent::NewCustomerMessage(_) => EventKind::NewCustomerMessage,
            ServerEvent::NewAgentMessage(_) => EventKind::NewAgentMessage,
            ServerEvent::SystemMessage(_) => EventKind::SystemMessage,
            ServerEvent::InteractiveMessage(_) => EventKind::InteractiveMessage,
            ServerEvent::FormStep(_) => EventKind::FormStep,
            ServerEvent::TicketCreated(_) => EventKind::TicketCreated,
            ServerEvent::TicketUpdated(_) => EventKind::TicketUpdated,
            ServerEvent::NewTicketCreated(_) => EventKind::NewTicketCreated,
            ServerEvent::TicketEscalated(_) => EventKind::TicketEscalated,
            ServerEvent::NewCustomer(_) => EventKind::NewCustomer,
            ServerEvent::CustomerUpdated(_) => EventKind::CustomerUpdated,
            ServerEvent::DashboardStatsUpdated(_) => EventKind::DashboardStatsUpdated,
            ServerEvent::AgentActionCompleted(_) => EventKind::AgentActionCompleted,
            ServerEvent::MessagesAcknowledged(_) => EventKind::MessagesAcknowledged,
            ServerEvent::Error(_) => EventKind::Error,
            ServerEvent::TicketsResponse(_) => EventKind::TicketsResponse,
            ServerEvent::TicketResponse(_) => EventKind::TicketResponse,
            ServerEvent::TicketMessagesResponse(_) => EventKind::TicketMessagesResponse,
            ServerEvent::MessageSent(_) => EventKind::MessageSent,
            ServerEvent::TicketAssigned(_) => EventKind::TicketAssigned,
            ServerEvent::TicketClosed(_) => EventKind::TicketClosed,
        }
    }

    /// Phone of the conversation this event is addressed to, if it says.
    pub fn phone(&self) -> Option<&str> {
        match self {
            ServerEvent::NewCustomerMessage(e) => e.phone(),
            ServerEvent::NewAgentMessage(e) => e
                .phone_number
                .as_deref()
                .or(e.message.phone_number.as_deref()),
            ServerEvent::SystemMessage(e) => e.phone_number.as_deref(),
            ServerEvent::InteractiveMessage(e) => e.phone_number.as_deref(),
            ServerEvent::FormStep(e) => e.phone_number.as_deref(),
            ServerEvent::TicketCreated(e) => e.phone_number.as_deref(),
            ServerEvent::MessagesAcknowledged(e) => e.phone_number.as_deref(),
            ServerEvent::CustomerConnected(e) => e
                .customer
                .as_ref()
                .and_then(|c| c.phone_number.as_deref()),
            _ => None,
        }
    }

    /// Correlation id of a request response.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            ServerEvent::TicketUpdated(p)
            | ServerEvent::TicketsResponse(p)
            | ServerEvent::TicketResponse(p)
            | ServerEvent::TicketMessagesResponse(p)
            | ServerEvent::MessageSent(p)
            | ServerEvent::TicketAssigned(p)
            | ServerEvent::TicketClosed(p) => p.request_id,
            _ => None,
        }
    }
}

/// Discriminant of [`ServerEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    ConnectionStatus,
    CustomerConnected,
    AgentConnected,
    AgentJoined,
    AgentLeft,
    NewCustomerMessage,
    NewAgentMessage,
    SystemMessage,
    InteractiveMessage,
    FormStep,
    TicketCreated,
    TicketUpdated,
    NewTicketCreated,
    TicketEscalated,
    NewCustomer,
    CustomerUpdated,
    DashboardStatsUpdated,
    AgentActionCompleted,
    MessagesAcknowledged,
    Error,
    TicketsResponse,
    TicketResponse,
    TicketMessagesResponse,
    MessageSent,
    TicketAssigned,
    TicketClosed,
}

impl EventKind {
    /// Wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ConnectionStatus => "connectionStatus",
            EventKind::CustomerConnected => "customerConnected",
            EventKind::AgentConnected => "agentConnected",
            EventKind::AgentJoined => "agentJoined",
            EventKind::AgentLeft => "agentLeft",
            EventKind::NewCustomerMessage => "newCustomerMessage",
            EventKind::NewAgentMessage => "newAgentMessage",
            EventKind::SystemMessage => "systemMessage",
            EventKind::InteractiveMessage => "interactiveMessage",
            EventKind::FormStep => "formStep",
            EventKind::TicketCreated => "ticketCreated",
            EventKind::TicketUpdated => "ticketUpdated",
            EventKind::NewTicketCreated => "newTicketCreated",
            EventKind::TicketEscalated => "ticketEscalated",
            EventKind::NewCustomer => "newCustomer",
            EventKind::CustomerUpdated => "customerUpdated",
            EventKind::DashboardStatsUpdated => "dashboardStatsUpdated",
            EventKind::AgentActionCompleted => "agentActionCompleted",
            EventKind::MessagesAcknowledged => "messagesAcknowledged",
            EventKind::Error => "error",
            EventKind::TicketsResponse => "ticketsResponse",
            EventKind::TicketResponse => "ticketResponse",
            EventKind::TicketMessagesResponse => "ticketMessagesResponse",
            EventKind::MessageSent => "messageSent",
            EventKind::TicketAssigned => "ticketAssigned",
            EventKind::TicketClosed => "ticketClosed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_new_customer_message() {
        let data = r#"{
            "customer": {"id": 3, "phone_number": "+15551234567", "name": "Ana"},
            "message": {"id": 99, "message_text": "Hi", "sender_type": "customer"}
        }"#;
        let event = ServerEvent::from_frame("newCustomerMessage", data).unwrap();

        assert_eq!(event.kind(), EventKind::NewCustomerMessage);
        assert_eq!(event.phone(), Some("+15551234567"));
        match event {
            ServerEvent::NewCustomerMessage(e) => {
                let msg = e.message.unwrap();
                assert_eq!(msg.message_text.as_deref(), Some("Hi"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_is_an_error() {
        assert!(ServerEvent::from_frame("somethingElse", "{}").is_err());
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        assert!(ServerEvent::from_frame("agentConnected", r#"{"nope":1}"#).is_err());
        assert!(ServerEvent::from_frame("systemMessage", "{not json").is_err());
    }

    #[test]
    fn test_frame_round_trip_keeps_name() {
        let event = ServerEvent::SystemMessage(SystemMessageEvent {
            phone_number: None,
            message: "Agent joined".to_string(),
        });
        let (name, data) = event.to_frame().unwrap();
        assert_eq!(name, "systemMessage");
        assert_eq!(ServerEvent::from_frame(&name, &data).unwrap(), event);
    }

    #[test]
    fn test_response_request_id() {
        let event =
            ServerEvent::from_frame("ticketsResponse", r#"{"requestId":4,"tickets":[]}"#).unwrap();
        assert_eq!(event.request_id(), Some(4));
        match event {
            ServerEvent::TicketsResponse(p) => assert!(p.body.contains_key("tickets")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_form_step_fields_fallback() {
        let single: FormStepEvent =
            serde_json::from_str(r#"{"step":"contact","title":"Contact","field":{"name":"email"}}"#)
                .unwrap();
        assert_eq!(single.requested_fields().len(), 1);

        let none = FormStepEvent::default();
        assert!(none.requested_fields().is_empty());
    }
}
