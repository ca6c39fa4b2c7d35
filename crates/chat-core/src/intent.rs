//! Typed client-to-server intents.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::EventKind;

/// An intent emitted over the duplex connection.
///
/// Serializes as `{"event": "<name>", "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientIntent {
    #[serde(rename_all = "camelCase")]
    AgentConnect {
        agent_id: String,
        agent_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    CustomerConnect {
        phone_number: String,
        customer_name: Option<String>,
    },
    /// Join a logical agent room; the payload is the bare room id.
    JoinAgent(String),
    LeaveAgent(String),
    #[serde(rename_all = "camelCase")]
    AcknowledgeMessages { phone_number: String },
    #[serde(rename_all = "camelCase")]
    InteractiveResponse {
        button_id: String,
        button_title: String,
    },
    #[serde(rename_all = "camelCase")]
    FormStepComplete {
        step: String,
        step_data: Map<String, Value>,
    },
    #[serde(rename_all = "camelCase")]
    AgentAction {
        action: String,
        ticket_id: String,
        data: Value,
    },
    #[serde(rename_all = "camelCase")]
    GetTickets {
        request_id: u64,
        page: u32,
        limit: u32,
        status: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    GetTicket { request_id: u64, id: String },
    #[serde(rename_all = "camelCase")]
    UpdateTicketStatus {
        request_id: u64,
        id: String,
        status: String,
        agent_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AssignTicket {
        request_id: u64,
        id: String,
        agent_id: String,
    },
    #[serde(rename_all = "camelCase")]
    CloseTicket { request_id: u64, id: String },
    #[serde(rename_all = "camelCase")]
    GetTicketMessages {
        request_id: u64,
        id: String,
        limit: u32,
        offset: u32,
    },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        request_id: u64,
        ticket_id: String,
        message_text: String,
        agent_id: String,
    },
}

impl ClientIntent {
    /// Wire name of the intent.
    pub fn name(&self) -> &'static str {
        match self {
            ClientIntent::AgentConnect { .. } => "agentConnect",
            ClientIntent::CustomerConnect { .. } => "customerConnect",
            ClientIntent::JoinAgent(_) => "joinAgent",
            ClientIntent::LeaveAgent(_) => "leaveAgent",
            ClientIntent::AcknowledgeMessages { .. } => "acknowledgeMessages",
            ClientIntent::InteractiveResponse { .. } => "interactiveResponse",
            ClientIntent::FormStepComplete { .. } => "formStepComplete",
            ClientIntent::AgentAction { .. } => "agentAction",
            ClientIntent::GetTickets { .. } => "getTickets",
            ClientIntent::GetTicket { .. } => "getTicket",
            ClientIntent::UpdateTicketStatus { .. } => "updateTicketStatus",
            ClientIntent::AssignTicket { .. } => "assignTicket",
            ClientIntent::CloseTicket { .. } => "closeTicket",
            ClientIntent::GetTicketMessages { .. } => "getTicketMessages",
            ClientIntent::SendMessage { .. } => "sendMessage",
        }
    }
}

/// A request answered by a correlated response event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketRequest {
    GetTickets {
        page: u32,
        limit: u32,
        status: Option<String>,
    },
    GetTicket {
        id: String,
    },
    UpdateTicketStatus {
        id: String,
        status: String,
        agent_id: Option<String>,
    },
    AssignTicket {
        id: String,
        agent_id: String,
    },
    CloseTicket {
        id: String,
    },
    GetTicketMessages {
        id: String,
        limit: u32,
        offset: u32,
    },
    SendMessage {
        ticket_id: String,
        message_text: String,
        agent_id: String,
    },
}

impl SocketRequest {
    /// Event kind carrying the response.
    pub fn response_kind(&self) -> EventKind {
        match self {
            SocketRequest::GetTickets { .. } => EventKind::TicketsResponse,
            SocketRequest::GetTicket { .. } => EventKind::TicketResponse,
            SocketRequest::UpdateTicketStatus { .. } => EventKind::TicketUpdated,
            SocketRequest::AssignTicket { .. } => EventKind::TicketAssigned,
            SocketRequest::CloseTicket { .. } => EventKind::TicketClosed,
            SocketRequest::GetTicketMessages { .. } => EventKind::TicketMessagesResponse,
            SocketRequest::SendMessage { .. } => EventKind::MessageSent,
        }
    }

    /// Attach a correlation id, producing the intent to emit.
    pub fn into_intent(self, request_id: u64) -> ClientIntent {
        match self {
            SocketRequest::GetTickets {
                page,
                limit,
                status,
            } => ClientIntent::GetTickets {
                request_id,
                page,
                limit,
                status,
            },
            SocketRequest::GetTicket { id } => ClientIntent::GetTicket { request_id, id },
            SocketRequest::UpdateTicketStatus {
                id,
                status,
                agent_id,
            } => ClientIntent::UpdateTicketStatus {
                request_id,
                id,
                status,
                agent_id,
            },
            SocketRequest::AssignTicket { id, agent_id } => ClientIntent::AssignTicket {
                request_id,
                id,
                agent_id,
            },
            SocketRequest::CloseTicket { id } => ClientIntent::CloseTicket { request_id, id },
            SocketRequest::GetTicketMessages { id, limit, offset } => {
                ClientIntent::GetTicketMessages {
                    request_id,
                    id,
                    limit,
                    offset,
                }
            }
            SocketRequest::SendMessage {
                ticket_id,
                message_text,
                agent_id,
            } => ClientIntent::SendMessage {
                request_id,
                ticket_id,
                message_text,
                agent_id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_agent_connect_wire_shape() {
        let intent = ClientIntent::AgentConnect {
            agent_id: "1".to_string(),
            agent_name: Some("Admin User".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&intent).unwrap(),
            json!({"event": "agentConnect", "data": {"agentId": "1", "agentName": "Admin User"}})
        );
        assert_eq!(intent.name(), "agentConnect");
    }

    #[test]
    fn test_join_agent_carries_bare_id() {
        let intent = ClientIntent::JoinAgent("1".to_string());
        assert_eq!(
            serde_json::to_value(&intent).unwrap(),
            json!({"event": "joinAgent", "data": "1"})
        );
    }

    #[test]
    fn test_request_carries_request_id() {
        let request = SocketRequest::CloseTicket {
            id: "T-9".to_string(),
        };
        assert_eq!(request.response_kind(), EventKind::TicketClosed);

        let intent = request.into_intent(17);
        assert_eq!(
            serde_json::to_value(&intent).unwrap(),
            json!({"event": "closeTicket", "data": {"requestId": 17, "id": "T-9"}})
        );
    }
}
