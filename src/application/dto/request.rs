//! Request DTOs
//!
//! Data structures for operation and API request bodies.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use validator::Validate;

use crate::domain::ChatMessage;

/// Body of a `send_message` operation, also accepted by the broadcast route.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(min = 1, max = 64, message = "user_id must be 1-64 characters"))]
    pub user_id: String,

    #[validate(length(min = 1, max = 64, message = "chat_id must be 1-64 characters"))]
    pub chat_id: String,

    #[validate(length(min = 1, max = 4000, message = "content must be 1-4000 characters"))]
    pub content: String,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<SendMessageRequest> for ChatMessage {
    fn from(request: SendMessageRequest) -> Self {
        Self {
            user_id: request.user_id,
            chat_id: request.chat_id,
            content: request.content,
            timestamp: request.timestamp,
        }
    }
}
