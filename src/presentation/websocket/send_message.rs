//! `send_message` operation handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::operation::{Operation, OperationError};
use super::router::OperationHandler;
use crate::application::dto::SendMessageRequest;
use crate::application::services::{MessageError, MessageService};

pub struct SendMessageHandler<S: MessageService> {
    service: Arc<S>,
}

impl<S: MessageService> SendMessageHandler<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: MessageService + 'static> OperationHandler for SendMessageHandler<S> {
    async fn handle(&self, operation: &Operation) -> Result<Option<Value>, OperationError> {
        let request: SendMessageRequest = serde_json::from_value(operation.body.clone())
            .map_err(|e| OperationError::ProtocolFormat(e.to_string()))?;

        match self.service.send_message(request).await {
            Ok(_) => Ok(Some(json!({ "message": "success" }))),
            Err(MessageError::Validation(reason)) => Err(OperationError::ProtocolFormat(reason)),
            Err(MessageError::Storage(e)) => {
                tracing::warn!(
                    session_id = %operation.session_id,
                    request_id = operation.request_id,
                    attempt = operation.retry.retries(),
                    error = %e,
                    "send_message attempt failed"
                );
                Err(OperationError::Transient(e.to_string()))
            }
        }
    }
}
