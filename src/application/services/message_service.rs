//! Message Service
//!
//! Accepts a chat message, records it in the outbox within a transaction,
//! and fans it out to live subscribers once the write has committed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use validator::Validate;

use crate::application::dto::SendMessageRequest;
use crate::domain::{
    ChatMessage, MessageEvent, Notifier, OutboxRecord, OutboxRepository, UnitOfWork,
};
use crate::shared::error::AppError;
use crate::shared::validation::validation_message;

/// Message service trait
#[async_trait]
pub trait MessageService: Send + Sync {
    /// Record a message for publication and broadcast it to its chat.
    async fn send_message(&self, request: SendMessageRequest) -> Result<MessageEvent, MessageError>;
}

/// Message service errors
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Invalid message: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] AppError),
}

/// MessageService implementation
pub struct MessageServiceImpl<U, O, N>
where
    U: UnitOfWork,
    O: OutboxRepository<U::Tx>,
    N: Notifier,
{
    unit_of_work: Arc<U>,
    outbox: Arc<O>,
    notifier: Arc<N>,
    entity_name: String,
}

impl<U, O, N> MessageServiceImpl<U, O, N>
where
    U: UnitOfWork,
    O: OutboxRepository<U::Tx>,
    N: Notifier,
{
    pub fn new(
        unit_of_work: Arc<U>,
        outbox: Arc<O>,
        notifier: Arc<N>,
        entity_name: impl Into<String>,
    ) -> Self {
        Self {
            unit_of_work,
            outbox,
            notifier,
            entity_name: entity_name.into(),
        }
    }

    async fn record(&self, record: &OutboxRecord) -> Result<(), AppError> {
        let mut tx = self.unit_of_work.begin().await?;
        if let Err(e) = self.outbox.insert(&mut tx, record).await {
            if let Err(rollback) = self.unit_of_work.rollback(tx).await {
                tracing::warn!(error = %rollback, "Rollback after failed outbox insert failed");
            }
            return Err(e);
        }
        self.unit_of_work.commit(tx).await
    }
}

#[async_trait]
impl<U, O, N> MessageService for MessageServiceImpl<U, O, N>
where
    U: UnitOfWork + 'static,
    O: OutboxRepository<U::Tx> + 'static,
    N: Notifier + 'static,
{
    async fn send_message(&self, request: SendMessageRequest) -> Result<MessageEvent, MessageError> {
        request
            .validate()
            .map_err(|e| MessageError::Validation(validation_message(&e)))?;

        let message = ChatMessage::from(request);
        let event = MessageEvent::sent(&message, Utc::now());
        let record = OutboxRecord::pending(&self.entity_name, event.to_bytes()?);

        self.record(&record).await?;
        tracing::debug!(
            outbox_id = %record.id,
            chat_id = %message.chat_id,
            "Message recorded in outbox"
        );

        // The write is committed; a fan-out failure must not surface as an
        // error, or a retry would record the message twice.
        match serde_json::to_value(&message) {
            Ok(payload) => {
                if let Err(e) = self.notifier.notify(&message.chat_id, payload).await {
                    tracing::warn!(chat_id = %message.chat_id, error = %e, "Broadcast after send failed");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize message for broadcast"),
        }

        Ok(event)
    }
}
