//! Outbox Processor
//!
//! One relay tick: claim a batch of rows under lock-skip semantics, publish
//! each, record its outcome, and commit once.

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::domain::{
    Broker, BrokerMessage, ClaimFilter, OutboxRecord, OutboxRepository, OutboxStatus, UnitOfWork,
};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

/// Counts for one processed batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub processed: usize,
    pub failed: usize,
}

/// A single record's failure within a batch.
#[derive(Debug, thiserror::Error)]
pub enum RecordFailure {
    #[error("publish of {id} failed: {source}")]
    Publish { id: Uuid, source: AppError },

    #[error("marking {id} as {status} failed: {source}")]
    MarkStatus {
        id: Uuid,
        status: OutboxStatus,
        source: AppError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to begin outbox transaction: {0}")]
    Begin(AppError),

    #[error("failed to claim outbox records: {0}")]
    Claim(AppError),

    #[error("failed to commit outbox batch: {source}")]
    Commit { source: AppError, report: BatchReport },

    #[error("{} of {} outbox records failed: {}", .failures.len(), .report.claimed, join(.failures))]
    Partial {
        report: BatchReport,
        failures: Vec<RecordFailure>,
    },
}

impl RelayError {
    /// Counts of the batch the error belongs to, when it got that far.
    pub fn report(&self) -> Option<BatchReport> {
        match self {
            Self::Commit { report, .. } | Self::Partial { report, .. } => Some(*report),
            _ => None,
        }
    }
}

fn join(failures: &[RecordFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct OutboxProcessor<U, O, B>
where
    U: UnitOfWork,
    O: OutboxRepository<U::Tx>,
    B: Broker,
{
    unit_of_work: Arc<U>,
    outbox: Arc<O>,
    broker: Arc<B>,
    filter: ClaimFilter,
}

impl<U, O, B> OutboxProcessor<U, O, B>
where
    U: UnitOfWork,
    O: OutboxRepository<U::Tx>,
    B: Broker,
{
    pub fn new(unit_of_work: Arc<U>, outbox: Arc<O>, broker: Arc<B>, filter: ClaimFilter) -> Self {
        Self {
            unit_of_work,
            outbox,
            broker,
            filter,
        }
    }

    /// Claim, publish and settle one batch.
    ///
    /// A failed publish marks only that record `failed`; its siblings are
    /// still published. Per-record failures are joined into
    /// [`RelayError::Partial`] after the batch has committed.
    pub async fn process_batch(&self) -> Result<BatchReport, RelayError> {
        let started = Instant::now();
        let mut tx = self.unit_of_work.begin().await.map_err(RelayError::Begin)?;

        let records = match self.outbox.claim(&mut tx, &self.filter).await {
            Ok(records) => records,
            Err(e) => {
                if let Err(rollback) = self.unit_of_work.rollback(tx).await {
                    tracing::warn!(error = %rollback, "Rollback after failed claim failed");
                }
                return Err(RelayError::Claim(e));
            }
        };

        let mut report = BatchReport {
            claimed: records.len(),
            ..BatchReport::default()
        };
        let mut failures = Vec::new();

        for record in records {
            let status = match self.broker.publish(broker_message(&record)).await {
                Ok(()) => OutboxStatus::Processed,
                Err(source) => {
                    tracing::warn!(outbox_id = %record.id, error = %source, "Outbox publish failed");
                    failures.push(RecordFailure::Publish {
                        id: record.id,
                        source,
                    });
                    OutboxStatus::Failed
                }
            };

            match self.outbox.set_status(&mut tx, record.id, status).await {
                Ok(()) if status == OutboxStatus::Processed => report.processed += 1,
                Ok(()) => report.failed += 1,
                Err(source) => failures.push(RecordFailure::MarkStatus {
                    id: record.id,
                    status,
                    source,
                }),
            }
        }

        self.unit_of_work
            .commit(tx)
            .await
            .map_err(|source| RelayError::Commit { source, report })?;

        metrics::record_outbox_batch(
            &self.filter.entity_name,
            report.processed,
            report.failed,
            started.elapsed().as_secs_f64(),
        );
        if report.claimed > 0 {
            tracing::debug!(
                entity = %self.filter.entity_name,
                claimed = report.claimed,
                processed = report.processed,
                failed = report.failed,
                "Outbox batch settled"
            );
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(RelayError::Partial { report, failures })
        }
    }
}

fn broker_message(record: &OutboxRecord) -> BrokerMessage {
    BrokerMessage {
        key: record.id.to_string().into_bytes(),
        value: record.payload.clone(),
    }
}
