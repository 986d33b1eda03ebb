//! Outbox record entity and repository trait.
//!
//! Maps to the `outbox` table:
//! - id: UUID PRIMARY KEY
//! - entity_name: TEXT NOT NULL
//! - status: TEXT NOT NULL ('pending' | 'processed' | 'failed')
//! - payload: BYTEA NOT NULL
//! - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
//!
//! Rows are written in the same transaction as the domain write they shadow,
//! mutated only by the relay, and never deleted.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::error::AppError;

/// Lifecycle of an outbox row. `Pending` moves to one of the other two
/// exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for OutboxStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(AppError::Internal(format!("unknown outbox status: {other}"))),
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A queued event awaiting publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub entity_name: String,
    pub status: OutboxStatus,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    /// New pending record with a time-ordered id.
    pub fn pending(entity_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::now_v7(),
            entity_name: entity_name.into(),
            status: OutboxStatus::Pending,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Which rows a relay tick claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimFilter {
    pub entity_name: String,
    pub status: OutboxStatus,
    pub limit: i64,
}

impl ClaimFilter {
    pub fn pending(entity_name: impl Into<String>, limit: i64) -> Self {
        Self {
            entity_name: entity_name.into(),
            status: OutboxStatus::Pending,
            limit,
        }
    }
}

/// Outbox data access, always inside a caller-owned transaction `Tx`.
#[async_trait]
pub trait OutboxRepository<Tx: Send>: Send + Sync {
    /// Insert a record alongside the domain write in `tx`.
    async fn insert(&self, tx: &mut Tx, record: &OutboxRecord) -> Result<(), AppError>;

    /// Claim up to `filter.limit` oldest rows matching the filter, locking
    /// them for the lifetime of `tx` and skipping rows locked elsewhere.
    async fn claim(&self, tx: &mut Tx, filter: &ClaimFilter)
        -> Result<Vec<OutboxRecord>, AppError>;

    /// Record the outcome of publishing a claimed row.
    async fn set_status(&self, tx: &mut Tx, id: Uuid, status: OutboxStatus)
        -> Result<(), AppError>;
}
