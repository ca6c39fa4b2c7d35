//! Ordered, deduplicated message collection for the active conversation.

use std::collections::HashSet;

use chat_core::{ConversationKey, IdOrigin, Message, MessageRecord, SenderKind};
use chrono::{DateTime, Utc};
use tracing::debug;

/// A change to apply to the collection.
#[derive(Debug, Clone)]
pub enum Merge {
    /// The collection becomes exactly this batch.
    Replace(Vec<Message>),
    /// Older messages, oldest first, placed before the current collection.
    Prepend(Vec<Message>),
    /// One newer message.
    Append(Message),
}

/// Kind of the last applied change. Drives scrolling: follow the bottom on
/// replace and append, keep the visible line on prepend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Replace,
    Prepend,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The change was applied; `added` messages entered the collection.
    Applied { added: usize },
    /// An appended message duplicated an existing one.
    Duplicate,
    /// The change was addressed to another conversation.
    Stale,
}

/// Messages of one conversation in display order, oldest first.
///
/// No two entries share an id. Appends are also rejected when an entry
/// with the same text lies within the duplicate window.
#[derive(Debug, Default)]
pub struct MessageStore {
    key: Option<ConversationKey>,
    messages: Vec<Message>,
    last_mutation: Option<MutationKind>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `key` the active conversation with an empty collection.
    pub fn activate(&mut self, key: ConversationKey) {
        self.key = Some(key);
        self.messages.clear();
        self.last_mutation = None;
    }

    /// Forget the active conversation.
    pub fn clear(&mut self) {
        self.key = None;
        self.messages.clear();
        self.last_mutation = None;
    }

    pub fn key(&self) -> Option<&ConversationKey> {
        self.key.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    pub fn merge(&mut self, key: &ConversationKey, merge: Merge) -> MergeOutcome {
        let replacing = matches!(merge, Merge::Replace(_));
        if !replacing && self.key.as_ref() != Some(key) {
            debug!(key = %key, "Dropping merge for inactive conversation");
            return MergeOutcome::Stale;
        }

        match merge {
            Merge::Replace(batch) => {
                let added = batch.len();
                self.key = Some(key.clone());
                self.messages = batch;
                self.last_mutation = Some(MutationKind::Replace);
                MergeOutcome::Applied { added }
            }
            Merge::Prepend(batch) => {
                let mut seen: HashSet<String> =
                    self.messages.iter().map(|m| m.id.clone()).collect();
                let older: Vec<Message> = batch
                    .into_iter()
                    .filter(|m| seen.insert(m.id.clone()))
                    .collect();
                let added = older.len();
                self.messages.splice(0..0, older);
                self.last_mutation = Some(MutationKind::Prepend);
                MergeOutcome::Applied { added }
            }
            Merge::Append(message) => {
                if self.messages.iter().any(|m| message.is_duplicate_of(m)) {
                    debug!(id = %message.id, "Skipping duplicate message");
                    return MergeOutcome::Duplicate;
                }
                self.messages.push(message);
                self.last_mutation = Some(MutationKind::Append);
                MergeOutcome::Applied { added: 1 }
            }
        }
    }

    /// Kind of the last applied change, without consuming it.
    pub fn last_mutation(&self) -> Option<MutationKind> {
        self.last_mutation
    }

    /// Consume the last applied change.
    pub fn take_last_mutation(&mut self) -> Option<MutationKind> {
        self.last_mutation.take()
    }
}

/// Turn a newest-first history page into display order.
pub fn chronological(
    records: Vec<MessageRecord>,
    key: &ConversationKey,
    now: DateTime<Utc>,
) -> Vec<Message> {
    let mut messages: Vec<Message> = records
        .into_iter()
        .map(|record| record.into_message(key, IdOrigin::Server, SenderKind::Customer, now))
        .collect();
    messages.reverse();
    messages
}
