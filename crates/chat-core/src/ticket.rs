//! Support ticket summaries.
//!
//! The engine only uses tickets to decide whether sending is allowed, so the
//! record is deliberately small.

use serde::{Deserialize, Serialize};

use crate::message::RecordId;

/// Lifecycle state of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    PendingCustomer,
    Closed,
    #[serde(other)]
    Unknown,
}

/// A ticket as listed for one customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketSummary {
    pub id: RecordId,
    pub status: TicketStatus,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

impl TicketSummary {
    /// Any ticket that is not closed counts as open.
    pub fn is_open(&self) -> bool {
        self.status != TicketStatus::Closed
    }
}
