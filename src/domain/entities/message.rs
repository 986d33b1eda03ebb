//! Chat message entity, its broker event form, and the message repository trait.
//!
//! Persisted rows live in the `messages` table:
//! - id: BIGSERIAL PRIMARY KEY
//! - stream_id: TEXT NOT NULL UNIQUE (stream entry id, deduplicates redelivery)
//! - user_id: TEXT NOT NULL
//! - chat_id: TEXT NOT NULL
//! - content: TEXT NOT NULL
//! - created_at: TIMESTAMPTZ NOT NULL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

use super::StreamEntry;

/// Event kind stamped on every sent chat message.
pub const SENT_MESSAGE_EVENT: &str = "sent-message-event";

/// Outbox entity kind for chat messages.
pub const MESSAGE_ENTITY: &str = "message";

/// A chat message as it travels between clients and the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user_id: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: None,
        }
    }
}

/// Serialized snapshot of a sent message, stored as the outbox payload and
/// published to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub event: String,
    pub user_id: String,
    pub chat_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl MessageEvent {
    /// Build a `sent-message-event`, stamping `now` when the message carries no timestamp.
    pub fn sent(message: &ChatMessage, now: DateTime<Utc>) -> Self {
        Self {
            event: SENT_MESSAGE_EVENT.to_string(),
            user_id: message.user_id.clone(),
            chat_id: message.chat_id.clone(),
            content: message.content.clone(),
            timestamp: message.timestamp.unwrap_or(now),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, AppError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AppError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Durable append-only message storage.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persist a batch in one round trip. Returns the number of newly stored
    /// rows; entries already stored under the same stream id are skipped.
    async fn save_batch(&self, entries: &[StreamEntry]) -> Result<u64, AppError>;
}
