//! Builders for records and events used across tests.

use chat_core::{
    AgentMessageEvent, ConnectionStatus, CustomerMessageEvent, CustomerRef, MessageRecord,
    SenderKind, ServerEvent,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Fixed reference time: 2024-01-01T00:00:00Z.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// `count` records, oldest first, one minute apart.
///
/// Ids run `1..=count`; text is `"message <id>"`; senders alternate
/// starting with the customer.
pub fn history_records(count: usize) -> Vec<MessageRecord> {
    (1..=count)
        .map(|n| {
            let sender = if n % 2 == 1 {
                SenderKind::Customer
            } else {
                SenderKind::Agent
            };
            MessageRecord::new(
                n as i64,
                sender,
                format!("message {}", n),
                base_time() + Duration::minutes(n as i64),
            )
        })
        .collect()
}

/// `newCustomerMessage` with the phone carried on the customer record.
pub fn customer_message(phone: &str, id: i64, text: &str, at: DateTime<Utc>) -> ServerEvent {
    ServerEvent::NewCustomerMessage(CustomerMessageEvent {
        phone_number: None,
        customer: Some(CustomerRef {
            phone_number: Some(phone.to_string()),
            ..Default::default()
        }),
        message: Some(MessageRecord::new(id, SenderKind::Customer, text, at)),
    })
}

/// `newAgentMessage` as the server pushes it after a confirmed send.
pub fn agent_message(phone: &str, id: i64, text: &str, at: DateTime<Utc>) -> ServerEvent {
    ServerEvent::NewAgentMessage(AgentMessageEvent {
        phone_number: Some(phone.to_string()),
        message: MessageRecord::new(id, SenderKind::Agent, text, at),
    })
}

pub fn connected() -> ServerEvent {
    ServerEvent::ConnectionStatus(ConnectionStatus::up())
}

pub fn disconnected(reason: &str) -> ServerEvent {
    ServerEvent::ConnectionStatus(ConnectionStatus::down(Some(reason.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_records_are_oldest_first() {
        let records = history_records(3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].message_text.as_deref(), Some("message 1"));
        assert!(records[0].created_at < records[2].created_at);
        assert_eq!(records[1].sender_type.as_deref(), Some("agent"));
    }

    #[test]
    fn test_customer_message_phone() {
        let event = customer_message("+1", 1, "hi", base_time());
        assert_eq!(event.phone(), Some("+1"));
    }
}
