//! Transaction boundary port.

use async_trait::async_trait;

use crate::shared::error::AppError;

/// Unit of Work: groups repository calls into one atomic transaction.
///
/// `Tx` is the transaction handle repositories receive. Dropping a `Tx`
/// without committing must roll it back.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Tx: Send;

    /// Begin a new transaction.
    async fn begin(&self) -> Result<Self::Tx, AppError>;

    /// Commit the transaction.
    async fn commit(&self, tx: Self::Tx) -> Result<(), AppError>;

    /// Rollback the transaction.
    async fn rollback(&self, tx: Self::Tx) -> Result<(), AppError>;
}
