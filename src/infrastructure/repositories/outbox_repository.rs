//! Outbox Repository Implementation
//!
//! PostgreSQL implementation of outbox access. All calls run inside the
//! caller's transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{ClaimFilter, OutboxRecord, OutboxRepository, OutboxStatus};
use crate::infrastructure::database::TransactionContext;
use crate::shared::error::AppError;

/// PostgreSQL outbox repository implementation.
#[derive(Debug, Clone, Default)]
pub struct PgOutboxRepository;

impl PgOutboxRepository {
    pub fn new() -> Self {
        Self
    }
}

/// Internal row type for outbox queries.
#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    entity_name: String,
    status: String,
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = AppError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            entity_name: row.entity_name,
            status: row.status.parse()?,
            payload: row.payload,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl OutboxRepository<TransactionContext> for PgOutboxRepository {
    async fn insert(
        &self,
        tx: &mut TransactionContext,
        record: &OutboxRecord,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO outbox (id, entity_name, status, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(&record.entity_name)
        .bind(record.status.as_str())
        .bind(&record.payload)
        .bind(record.created_at)
        .execute(tx.connection())
        .await?;

        Ok(())
    }

    async fn claim(
        &self,
        tx: &mut TransactionContext,
        filter: &ClaimFilter,
    ) -> Result<Vec<OutboxRecord>, AppError> {
        // SKIP LOCKED: rows held by a concurrent relay are invisible here
        // until that relay's transaction ends.
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, entity_name, status, payload, created_at
            FROM outbox
            WHERE status = $1 AND entity_name = $2
            ORDER BY created_at ASC
            LIMIT $3
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(filter.status.as_str())
        .bind(&filter.entity_name)
        .bind(filter.limit)
        .fetch_all(tx.connection())
        .await?;

        rows.into_iter().map(OutboxRecord::try_from).collect()
    }

    async fn set_status(
        &self,
        tx: &mut TransactionContext,
        id: Uuid,
        status: OutboxStatus,
    ) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE outbox SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(tx.connection())
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("outbox record {id}")));
        }
        Ok(())
    }
}
