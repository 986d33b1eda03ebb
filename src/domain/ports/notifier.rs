//! Fan-out port.

use async_trait::async_trait;
use serde_json::Value;

use crate::shared::error::AppError;

/// Delivers a payload to every live subscriber of a topic.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, topic: &str, payload: Value) -> Result<(), AppError>;
}
