//! Operation Router
//!
//! Registry from operation kind to handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::timeout_at;

use super::operation::{Operation, OperationError, OperationKind};

#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Handle one attempt. `Ok(Some(data))` is returned to the client as `data`.
    async fn handle(&self, operation: &Operation) -> Result<Option<Value>, OperationError>;
}

#[derive(Clone, Default)]
pub struct OperationRouter {
    handlers: HashMap<OperationKind, Arc<dyn OperationHandler>>,
}

impl OperationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(mut self, kind: OperationKind, handler: H) -> Self
    where
        H: OperationHandler + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Run the registered handler, bounded by the operation's deadline.
    pub async fn route(&self, operation: &Operation) -> Result<Option<Value>, OperationError> {
        let handler = self
            .handlers
            .get(&operation.kind)
            .ok_or_else(|| OperationError::Unsupported(operation.kind.as_str().to_string()))?;

        timeout_at(operation.deadline, handler.handle(operation))
            .await
            .unwrap_or(Err(OperationError::Timeout))
    }
}
