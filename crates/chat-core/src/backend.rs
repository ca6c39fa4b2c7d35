//! Request and response shapes of the REST backend.

use serde::{Deserialize, Serialize};

use crate::message::MessageRecord;

/// Direction in which history rows are requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[serde(rename = "ASC")]
    Ascending,
    #[default]
    #[serde(rename = "DESC")]
    Descending,
}

impl SortOrder {
    /// Query-string form used by the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

/// One page of history to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub limit: usize,
    pub offset: usize,
    pub order: SortOrder,
}

impl HistoryQuery {
    /// The newest `limit` messages of a conversation.
    pub fn latest(limit: usize) -> Self {
        Self {
            limit,
            offset: 0,
            order: SortOrder::Descending,
        }
    }
}

/// A page of history rows as returned by the backend.
///
/// Rows are in the order requested by the query: newest first for
/// [`SortOrder::Descending`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryPage {
    #[serde(default, rename = "data")]
    pub items: Vec<MessageRecord>,
    #[serde(default)]
    pub success: bool,
}

impl HistoryPage {
    /// A successful page holding the given rows.
    pub fn ok(items: Vec<MessageRecord>) -> Self {
        Self {
            items,
            success: true,
        }
    }

    /// A page the server marked as failed.
    pub fn failed() -> Self {
        Self::default()
    }
}

/// Outcome of a confirmed send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendReceipt {
    pub fn delivered() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_order_wire_form() {
        assert_eq!(SortOrder::Descending.as_str(), "DESC");
        assert_eq!(
            serde_json::to_string(&SortOrder::Ascending).unwrap(),
            "\"ASC\""
        );
    }

    #[test]
    fn test_history_page_decodes_backend_envelope() {
        let json = r#"{"success":true,"data":[{"id":7,"message_text":"hi","sender_type":"customer"}]}"#;
        let page: HistoryPage = serde_json::from_str(json).unwrap();
        assert!(page.success);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].message_text.as_deref(), Some("hi"));
    }

    #[test]
    fn test_send_receipt_missing_fields_is_failure() {
        let receipt: SendReceipt = serde_json::from_str("{}").unwrap();
        assert!(!receipt.success);
        assert!(receipt.error.is_none());
    }
}
