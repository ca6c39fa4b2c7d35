//! Chat message types.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Text used when a message arrives without any content.
pub const PLACEHOLDER_TEXT: &str = "Message";

/// Two lines with identical text closer together than this are one message.
pub const DUPLICATE_WINDOW_MS: i64 = 1000;

static LOCAL_SEQ: AtomicU64 = AtomicU64::new(1);

/// Identifier of one conversation: the customer's phone number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn new(phone: impl Into<String>) -> Self {
        Self(phone.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether an event addressed to `phone` belongs to this conversation.
    pub fn matches(&self, phone: &str) -> bool {
        self.0 == phone
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationKey {
    fn from(phone: &str) -> Self {
        Self::new(phone)
    }
}

impl From<String> for ConversationKey {
    fn from(phone: String) -> Self {
        Self(phone)
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    #[default]
    Customer,
    Agent,
    System,
    Error,
}

impl SenderKind {
    /// Parse the backend's `sender_type` column.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "customer" => Some(SenderKind::Customer),
            "agent" => Some(SenderKind::Agent),
            "system" => Some(SenderKind::System),
            "error" => Some(SenderKind::Error),
            _ => None,
        }
    }
}

/// Where a client-generated id came from. Encoded as the id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdOrigin {
    /// Optimistic echo of an agent send.
    Temporary,
    /// Server push that carried no id.
    Server,
    /// Locally inserted failure marker.
    Error,
    /// Any other locally synthesized line.
    Local,
}

impl IdOrigin {
    pub fn prefix(&self) -> &'static str {
        match self {
            IdOrigin::Temporary => "temp_",
            IdOrigin::Server => "srv_",
            IdOrigin::Error => "error_",
            IdOrigin::Local => "msg_",
        }
    }

    /// Generate a fresh id such as `temp_1700000000000_3`.
    ///
    /// The trailing sequence keeps ids distinct within one millisecond.
    pub fn generate(&self, at: DateTime<Utc>) -> String {
        let seq = LOCAL_SEQ.fetch_add(1, Ordering::Relaxed);
        format!("{}{}_{}", self.prefix(), at.timestamp_millis(), seq)
    }
}

/// A single chat line in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_key: ConversationKey,
    pub sender: SenderKind,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Selectable options of an interactive prompt, carried opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive: Option<Vec<Value>>,
    /// Field descriptors of a form step, carried opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<Vec<Value>>,
}

impl Message {
    /// Create a locally synthesized message with a `msg_` id.
    pub fn new(
        key: &ConversationKey,
        sender: SenderKind,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: IdOrigin::Local.generate(timestamp),
            conversation_key: key.clone(),
            sender,
            text: non_empty(text.into()),
            timestamp,
            interactive: None,
            form: None,
        }
    }

    /// Optimistic echo of an agent message, tagged with a `temp_` id.
    pub fn optimistic(key: &ConversationKey, text: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(key, SenderKind::Agent, text, now).with_id(IdOrigin::Temporary.generate(now))
    }

    /// Error-kind line with an `error_` id.
    pub fn error_marker(key: &ConversationKey, text: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(key, SenderKind::Error, text, now).with_id(IdOrigin::Error.generate(now))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_interactive(mut self, options: Vec<Value>) -> Self {
        self.interactive = Some(options);
        self
    }

    pub fn with_form(mut self, fields: Vec<Value>) -> Self {
        self.form = Some(fields);
        self
    }

    /// Duplicate rule: same id, or same text within [`DUPLICATE_WINDOW_MS`].
    pub fn is_duplicate_of(&self, other: &Message) -> bool {
        if self.id == other.id {
            return true;
        }
        self.text == other.text
            && (self.timestamp - other.timestamp).num_milliseconds().abs() < DUPLICATE_WINDOW_MS
    }
}

fn non_empty(text: String) -> String {
    if text.is_empty() {
        PLACEHOLDER_TEXT.to_string()
    } else {
        text
    }
}

/// Server-side message id: numeric row id or opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Number(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Number(n) => write!(f, "{}", n),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

/// A message row as the backend serializes it, both in history pages and
/// inside push events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(default)]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub message_text: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub sender_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl MessageRecord {
    /// Build a record from the fields tests and mocks care about.
    pub fn new(id: i64, sender: SenderKind, text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let sender_type = match sender {
            SenderKind::Customer => "customer",
            SenderKind::Agent => "agent",
            SenderKind::System => "system",
            SenderKind::Error => "error",
        };
        Self {
            id: Some(RecordId::Number(id)),
            message_text: Some(text.into()),
            sender_type: Some(sender_type.to_string()),
            created_at: Some(created_at.to_rfc3339()),
            ..Default::default()
        }
    }

    /// Convert into a display message.
    ///
    /// Missing ids are generated with `origin`, a missing or unknown sender
    /// falls back to `default_sender`, and a missing or unparseable
    /// creation time falls back to `now`.
    pub fn into_message(
        self,
        key: &ConversationKey,
        origin: IdOrigin,
        default_sender: SenderKind,
        now: DateTime<Utc>,
    ) -> Message {
        let timestamp = self
            .created_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(now);
        let id = match self.id {
            Some(id) => id.to_string(),
            None => origin.generate(now),
        };
        let sender = self
            .sender_type
            .as_deref()
            .and_then(SenderKind::parse)
            .unwrap_or(default_sender);
        let text = self.message_text.or(self.text).unwrap_or_default();

        Message {
            id,
            conversation_key: key.clone(),
            sender,
            text: non_empty(text),
            timestamp,
            interactive: None,
            form: None,
        }
    }
}

/// Parse a backend timestamp: RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS`
/// taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}
