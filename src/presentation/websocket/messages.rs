//! WebSocket Message Types
//!
//! JSON envelopes exchanged between clients and the hub.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::operation::{OperationError, OperationKind, OperationResult};

/// Incoming operation request
#[derive(Debug, Clone, Deserialize)]
pub struct OperationRequest {
    #[serde(default)]
    pub id: i64,
    pub operation: String,
    #[serde(default)]
    pub body: Value,
}

impl OperationRequest {
    /// Parse an inbound text frame. On failure, returns the request id when
    /// one could still be recovered so the error can be correlated.
    pub fn parse(text: &str) -> Result<Self, (i64, OperationError)> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| (0, OperationError::ProtocolFormat(e.to_string())))?;
        let id = value.get("id").and_then(Value::as_i64).unwrap_or_default();
        serde_json::from_value(value).map_err(|e| (id, OperationError::ProtocolFormat(e.to_string())))
    }
}

/// Outgoing operation response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub id: i64,
    pub operation_type: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResponse {
    pub fn success(id: i64, operation_type: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            id,
            operation_type: operation_type.into(),
            success: true,
            data,
            error: None,
        }
    }

    pub fn failure(id: i64, operation_type: impl Into<String>, error: &OperationError) -> Self {
        Self {
            id,
            operation_type: operation_type.into(),
            success: false,
            data: None,
            error: Some(error.public_message()),
        }
    }

    pub fn from_result(id: i64, kind: OperationKind, result: OperationResult) -> Self {
        match result {
            Ok(data) => Self::success(id, kind.as_str(), data),
            Err(error) => Self::failure(id, kind.as_str(), &error),
        }
    }

    /// Server-originated fan-out envelope.
    pub fn broadcast(data: Value) -> Self {
        Self::success(0, OperationKind::Broadcast.as_str(), Some(data))
    }

    /// Serialize once so the same text can be shared across many queues.
    pub fn to_text(&self) -> Arc<str> {
        match serde_json::to_string(self) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize operation response");
                Arc::from(r#"{"id":0,"operation_type":"","success":false,"error":"internal error"}"#)
            }
        }
    }
}
