//! Broker port.

use async_trait::async_trait;

use crate::shared::error::AppError;

/// An opaque key/value message. The key is a partitioning and idempotency
/// hint, the value a serialized domain event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, message: BrokerMessage) -> Result<(), AppError>;
}
