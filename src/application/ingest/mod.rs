//! Stream Ingestion Pipeline
//!
//! ```text
//! stream ──▶ Subscriber ──entries──▶ BatchSaver ──tokens──▶ Acknowledger ──▶ XACK
//!                                        │                       │
//!                                        └── add() ─ AckCoordinator ─ done() ──┘
//! ```
//!
//! Entries are written before they are acknowledged, and shutdown waits on
//! the coordinator before it closes the acknowledgement queue. Delivery into
//! storage is at-least-once.
//!
//! Entries of an abandoned flush stay in the consumer's pending list. The
//! saver hands their ids over in a [`RedeliveryRequest`] and the subscriber
//! re-forwards exactly those from that list. On start it re-forwards the
//! whole list, which then holds only what a previous run left behind.

mod ack_coordinator;
mod acknowledger;
mod batch_saver;
mod pipeline;
mod subscriber;

pub use ack_coordinator::AckCoordinator;
pub use acknowledger::Acknowledger;
pub use batch_saver::BatchSaver;
pub use pipeline::{IngestConfig, IngestPipeline, PipelineHandle};
pub use subscriber::Subscriber;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::shared::error::AppError;

/// Acknowledgement token for one durably written entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckToken {
    pub id: String,
}

/// Ids of abandoned entries, shared by the saver (raises) and the
/// subscriber (takes). Entries still in flight are never listed, so
/// re-forwarding these cannot duplicate work already in the pipeline.
#[derive(Debug, Clone, Default)]
pub struct RedeliveryRequest(Arc<Mutex<HashSet<String>>>);

impl RedeliveryRequest {
    pub fn raise<I>(&self, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.0.lock().extend(ids);
    }

    /// Drain the requested ids.
    pub fn take(&self) -> HashSet<String> {
        std::mem::take(&mut *self.0.lock())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to prepare consumer group: {0}")]
    Group(AppError),

    #[error("{stage} stage failed: {reason}")]
    StageFailed { stage: &'static str, reason: String },
}
