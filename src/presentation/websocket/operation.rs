//! Operations
//!
//! An operation is one client request travelling through the hub: parsed
//! from an inbound frame, dispatched to a handler, answered exactly once
//! through its response sink.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

pub type SessionId = Uuid;

/// Outcome delivered to the waiting session.
pub type OperationResult = Result<Option<Value>, OperationError>;

/// Closed set of operation kinds the hub understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    SendMessage,
    /// Server-originated fan-out. Never accepted from clients.
    Broadcast,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendMessage => "send_message",
            Self::Broadcast => "broadcast",
        }
    }

    /// Parse a kind a client may request.
    pub fn from_client(raw: &str) -> Result<Self, OperationError> {
        match raw {
            "send_message" => Ok(Self::SendMessage),
            other => Err(OperationError::Unsupported(other.to_string())),
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    #[error("malformed operation: {0}")]
    ProtocolFormat(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("operation deadline exceeded")]
    Timeout,

    #[error("operation canceled")]
    Canceled,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("hub is closed")]
    HubClosed,
}

impl OperationError {
    /// Terminal errors are answered immediately and never retried.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Transient(_))
    }

    /// Text safe to send to the client.
    pub fn public_message(&self) -> String {
        match self {
            Self::ProtocolFormat(detail) => format!("invalid operation format: {detail}"),
            Self::Unsupported(kind) => format!("unsupported operation: {kind}"),
            Self::Timeout => "operation timed out".into(),
            Self::Canceled => "operation canceled".into(),
            Self::Transient(_) => "temporary failure, please retry".into(),
            Self::HubClosed => "server is shutting down".into(),
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resubmit; `attempt` is the 1-based retry number.
    Retry { attempt: u32 },
    /// Surface the error to the client.
    GiveUp,
}

/// Bounded retry state carried by each operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    retries: u32,
    max_retries: u32,
}

impl RetryState {
    pub fn new(max_retries: u32) -> Self {
        Self {
            retries: 0,
            max_retries,
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn on_failure(&mut self, error: &OperationError) -> RetryDecision {
        if error.is_terminal() || self.retries >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        self.retries += 1;
        RetryDecision::Retry {
            attempt: self.retries,
        }
    }
}

/// A routed client request.
#[derive(Debug)]
pub struct Operation {
    pub session_id: SessionId,
    pub request_id: i64,
    pub kind: OperationKind,
    pub body: Value,
    pub deadline: Instant,
    pub retry: RetryState,
    responder: oneshot::Sender<OperationResult>,
}

impl Operation {
    pub fn new(
        session_id: SessionId,
        request_id: i64,
        kind: OperationKind,
        body: Value,
        timeout: Duration,
        max_retries: u32,
    ) -> (Self, oneshot::Receiver<OperationResult>) {
        let (responder, receiver) = oneshot::channel();
        let operation = Self {
            session_id,
            request_id,
            kind,
            body,
            deadline: Instant::now() + timeout,
            retry: RetryState::new(max_retries),
            responder,
        };
        (operation, receiver)
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Answer the operation. Consumes it, so a second answer cannot happen.
    pub fn respond(self, result: OperationResult) {
        if self.responder.send(result).is_err() {
            tracing::debug!(
                session_id = %self.session_id,
                request_id = self.request_id,
                "Operation response dropped, session already gone"
            );
        }
    }
}
