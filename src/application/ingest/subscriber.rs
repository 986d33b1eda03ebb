//! Subscriber stage: claims entries from the stream under a consumer group.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::{IngestError, RedeliveryRequest};
use crate::domain::{ConsumerGroup, MessageStream, StreamEntry, StreamRecord};
use crate::shared::error::AppError;
use crate::shared::signal;

/// Pause after a failed read before trying again.
const READ_RETRY_DELAY: Duration = Duration::from_secs(1);

enum Flow {
    Continue,
    Stop,
}

pub struct Subscriber<S: MessageStream> {
    stream: Arc<S>,
    group: ConsumerGroup,
    redelivery: RedeliveryRequest,
    claim_count: usize,
    block: Duration,
}

impl<S: MessageStream> Subscriber<S> {
    pub fn new(
        stream: Arc<S>,
        group: ConsumerGroup,
        redelivery: RedeliveryRequest,
        claim_count: usize,
        block: Duration,
    ) -> Self {
        Self {
            stream,
            group,
            redelivery,
            claim_count,
            block,
        }
    }

    /// Create the consumer group if it does not exist yet.
    pub async fn prepare(&self) -> Result<(), IngestError> {
        self.stream
            .ensure_group(&self.group)
            .await
            .map_err(IngestError::Group)
    }

    /// Claim and forward entries until `shutdown` fires or the next stage
    /// goes away.
    ///
    /// The whole pending list is forwarded once on start. Afterwards only
    /// the ids of abandoned flushes are picked out of it again. Records that
    /// cannot be parsed are logged and left unacknowledged.
    pub async fn run(self, entries: mpsc::Sender<StreamEntry>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            stream = %self.group.stream,
            group = %self.group.group,
            consumer = %self.group.consumer,
            "Subscriber started"
        );

        // Resumes where it left off if the start-up pass is interrupted.
        let mut startup = Some(String::from("0"));
        let mut abandoned = HashSet::new();

        'claim: loop {
            if let Some(cursor) = startup.as_mut() {
                match self.redeliver(cursor, None, &entries, &mut shutdown).await {
                    Ok(Flow::Continue) => startup = None,
                    Ok(Flow::Stop) => break 'claim,
                    Err(e) => match recovery_failed(e, &mut shutdown).await {
                        Flow::Continue => continue 'claim,
                        Flow::Stop => break 'claim,
                    },
                }
            }

            abandoned.extend(self.redelivery.take());
            if !abandoned.is_empty() {
                let mut cursor = String::from("0");
                match self
                    .redeliver(&mut cursor, Some(&mut abandoned), &entries, &mut shutdown)
                    .await
                {
                    Ok(Flow::Continue) => {
                        if !abandoned.is_empty() {
                            tracing::warn!(
                                missing = abandoned.len(),
                                "Abandoned entries no longer pending"
                            );
                            abandoned.clear();
                        }
                    }
                    Ok(Flow::Stop) => break 'claim,
                    Err(e) => match recovery_failed(e, &mut shutdown).await {
                        Flow::Continue => continue 'claim,
                        Flow::Stop => break 'claim,
                    },
                }
            }

            let read = tokio::select! {
                _ = signal::raised(&mut shutdown) => break 'claim,
                read = self.stream.read_group(&self.group, self.claim_count, self.block) => read,
            };

            let records = match read {
                Ok(records) => records,
                Err(e) => {
                    tracing::error!(error = %e, "Stream read failed");
                    match pause(&mut shutdown).await {
                        Flow::Continue => continue 'claim,
                        Flow::Stop => break 'claim,
                    }
                }
            };

            if let Flow::Stop = self.forward(records, &entries, &mut shutdown).await {
                break 'claim;
            }
        }

        tracing::info!(consumer = %self.group.consumer, "Subscriber stopped");
    }

    /// Walk this consumer's pending list after `cursor` and forward what is
    /// found. With `only`, just those ids are forwarded, each removed from
    /// the set as it goes, and the walk ends once the set is empty.
    async fn redeliver(
        &self,
        cursor: &mut String,
        mut only: Option<&mut HashSet<String>>,
        entries: &mpsc::Sender<StreamEntry>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Flow, AppError> {
        let mut redelivered = 0usize;

        loop {
            if only.as_ref().is_some_and(|ids| ids.is_empty()) {
                break;
            }
            let mut records = tokio::select! {
                _ = signal::raised(shutdown) => return Ok(Flow::Stop),
                read = self.stream.read_pending(&self.group, cursor.as_str(), self.claim_count) => read?,
            };
            let Some(last) = records.last() else {
                break;
            };
            *cursor = last.id.clone();
            if let Some(ids) = only.as_deref_mut() {
                records.retain(|record| ids.remove(&record.id));
            }
            redelivered += records.len();

            if let Flow::Stop = self.forward(records, entries, shutdown).await {
                return Ok(Flow::Stop);
            }
        }

        if redelivered > 0 {
            tracing::info!(redelivered, "Redelivered pending entries");
        }
        Ok(Flow::Continue)
    }

    /// Hand parsed entries to the batch stage. A full queue never holds up
    /// a stop request.
    async fn forward(
        &self,
        records: Vec<StreamRecord>,
        entries: &mpsc::Sender<StreamEntry>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Flow {
        for record in records {
            let entry = match StreamEntry::parse(&record) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed stream entry");
                    continue;
                }
            };

            let sent = tokio::select! {
                _ = signal::raised(shutdown) => return Flow::Stop,
                sent = entries.send(entry) => sent,
            };
            if sent.is_err() {
                tracing::warn!("Batch stage gone, subscriber exiting");
                return Flow::Stop;
            }
        }
        Flow::Continue
    }
}

async fn recovery_failed(error: AppError, shutdown: &mut watch::Receiver<bool>) -> Flow {
    tracing::error!(error = %error, "Pending list read failed");
    pause(shutdown).await
}

async fn pause(shutdown: &mut watch::Receiver<bool>) -> Flow {
    tokio::select! {
        _ = signal::raised(shutdown) => Flow::Stop,
        _ = tokio::time::sleep(READ_RETRY_DELAY) => Flow::Continue,
    }
}
