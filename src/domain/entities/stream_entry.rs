//! Stream entry entity and the consumer-group stream trait.
//!
//! Entries carry the fields `event, user_id, chat_id, content, timestamp`
//! (RFC 3339). The stream assigns each entry an opaque id that doubles as the
//! acknowledgement token.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::shared::error::AppError;

use super::MessageEvent;

pub const FIELD_EVENT: &str = "event";
pub const FIELD_USER_ID: &str = "user_id";
pub const FIELD_CHAT_ID: &str = "chat_id";
pub const FIELD_CONTENT: &str = "content";
pub const FIELD_TIMESTAMP: &str = "timestamp";

/// Reasons a raw stream record cannot become a [`StreamEntry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamEntryError {
    #[error("stream entry {id} is missing field `{field}`")]
    MissingField { id: String, field: &'static str },

    #[error("stream entry {id} has an invalid timestamp: {value}")]
    InvalidTimestamp { id: String, value: String },
}

/// A raw record as read from the stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamRecord {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// A parsed chat event claimed from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub event: String,
    pub user_id: String,
    pub chat_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl StreamEntry {
    pub fn parse(record: &StreamRecord) -> Result<Self, StreamEntryError> {
        let field = |name: &'static str| {
            record
                .fields
                .get(name)
                .cloned()
                .ok_or_else(|| StreamEntryError::MissingField {
                    id: record.id.clone(),
                    field: name,
                })
        };

        let raw_ts = field(FIELD_TIMESTAMP)?;
        let timestamp = DateTime::parse_from_rfc3339(&raw_ts)
            .map_err(|_| StreamEntryError::InvalidTimestamp {
                id: record.id.clone(),
                value: raw_ts.clone(),
            })?
            .with_timezone(&Utc);

        Ok(Self {
            id: record.id.clone(),
            event: field(FIELD_EVENT)?,
            user_id: field(FIELD_USER_ID)?,
            chat_id: field(FIELD_CHAT_ID)?,
            content: field(FIELD_CONTENT)?,
            timestamp,
        })
    }
}

/// Field list written to the stream for an event.
pub fn event_fields(event: &MessageEvent) -> Vec<(&'static str, String)> {
    vec![
        (FIELD_EVENT, event.event.clone()),
        (FIELD_USER_ID, event.user_id.clone()),
        (FIELD_CHAT_ID, event.chat_id.clone()),
        (FIELD_CONTENT, event.content.clone()),
        (FIELD_TIMESTAMP, event.timestamp.to_rfc3339()),
    ]
}

/// Consumer-group coordinates: which stream, which group, and who is reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerGroup {
    pub stream: String,
    pub group: String,
    pub consumer: String,
}

/// Durable log supporting consumer groups.
#[async_trait]
pub trait MessageStream: Send + Sync {
    /// Create the group (and the stream) if missing. Succeeds when it already exists.
    async fn ensure_group(&self, group: &ConsumerGroup) -> Result<(), AppError>;

    /// Claim up to `count` undelivered entries, waiting at most `block` for any.
    async fn read_group(
        &self,
        group: &ConsumerGroup,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamRecord>, AppError>;

    /// Re-read entries already delivered to this consumer but not yet
    /// acknowledged, oldest first, starting after id `after` ("0" for the
    /// beginning). Never blocks.
    async fn read_pending(
        &self,
        group: &ConsumerGroup,
        after: &str,
        count: usize,
    ) -> Result<Vec<StreamRecord>, AppError>;

    /// Confirm consumption of one entry.
    async fn ack(&self, group: &ConsumerGroup, id: &str) -> Result<(), AppError>;
}
