//! Message Repository Implementation
//!
//! Batch persistence of ingested stream entries.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::domain::{MessageRepository, StreamEntry};
use crate::shared::error::AppError;

/// Postgres caps bind parameters at 65535; five per row.
const MAX_ROWS_PER_STATEMENT: usize = 10_000;

/// PostgreSQL message repository implementation.
#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    /// Creates a new PgMessageRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn save_batch(&self, entries: &[StreamEntry]) -> Result<u64, AppError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut stored = 0;

        for chunk in entries.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO messages (stream_id, user_id, chat_id, content, created_at) ",
            );
            builder.push_values(chunk, |mut row, entry| {
                row.push_bind(&entry.id)
                    .push_bind(&entry.user_id)
                    .push_bind(&entry.chat_id)
                    .push_bind(&entry.content)
                    .push_bind(entry.timestamp);
            });
            builder.push(" ON CONFLICT (stream_id) DO NOTHING");

            stored += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(stored)
    }
}
