// Core domain types shared across all Courier crates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A chat message as it is persisted by the relay.
///
/// `id`, `sender_id` and `timestamp` are always server-assigned; only
/// `recipient_id` and `content` come from the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Value drawn from the message sequence counter.
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub content: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageInvariantError {
    #[error("senderId must be non-zero")]
    MissingSender,
    #[error("recipientId must be non-zero")]
    MissingRecipient,
    #[error("content must not be empty")]
    EmptyContent,
}

impl Message {
    /// A message that carries only the client-supplied fields.
    pub fn unsequenced(recipient_id: i64, content: impl Into<String>) -> Self {
        Self { id: 0, sender_id: 0, recipient_id, content: content.into(), timestamp: 0 }
    }

    /// Checks the fields that must be set before a message may be stored.
    pub fn ensure_persistable(&self) -> Result<(), MessageInvariantError> {
        if self.sender_id == 0 {
            return Err(MessageInvariantError::MissingSender);
        }
        if self.recipient_id == 0 {
            return Err(MessageInvariantError::MissingRecipient);
        }
        if self.content.is_empty() {
            return Err(MessageInvariantError::EmptyContent);
        }

        Ok(())
    }
}
