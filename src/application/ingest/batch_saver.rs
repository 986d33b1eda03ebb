//! Batch saver stage: accumulates entries and flushes them to storage when
//! the batch is full or the flush interval elapses.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::{AckCoordinator, AckToken, RedeliveryRequest};
use crate::domain::{MessageRepository, StreamEntry};
use crate::infrastructure::metrics;

pub struct BatchSaver<R: MessageRepository> {
    repository: Arc<R>,
    coordinator: AckCoordinator,
    redelivery: RedeliveryRequest,
    batch_size: usize,
    flush_interval: Duration,
}

impl<R: MessageRepository> BatchSaver<R> {
    pub fn new(
        repository: Arc<R>,
        coordinator: AckCoordinator,
        redelivery: RedeliveryRequest,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            repository,
            coordinator,
            redelivery,
            batch_size: batch_size.max(1),
            flush_interval,
        }
    }

    /// Run until the entry queue closes, then flush whatever is buffered.
    pub async fn run(self, mut entries: mpsc::Receiver<StreamEntry>, acks: mpsc::Sender<AckToken>) {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                next = entries.recv() => match next {
                    Some(entry) => {
                        batch.push(entry);
                        if batch.len() >= self.batch_size {
                            self.flush(&mut batch, &acks).await;
                            ticker.reset();
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch, &acks).await;
                    }
                }
            }
        }

        self.flush(&mut batch, &acks).await;
        tracing::info!("Batch saver drained");
    }

    /// Write the batch. Only after a successful write is each entry
    /// registered as an obligation and its token passed on. A failed write
    /// drops the batch and hands its ids back to the subscriber, which
    /// re-reads them from the pending list.
    async fn flush(&self, batch: &mut Vec<StreamEntry>, acks: &mpsc::Sender<AckToken>) {
        if batch.is_empty() {
            return;
        }
        let entries = std::mem::replace(batch, Vec::with_capacity(self.batch_size));

        match self.repository.save_batch(&entries).await {
            Ok(stored) => {
                metrics::record_flush("stored", entries.len());
                tracing::debug!(size = entries.len(), stored, "Batch flushed");

                self.coordinator.add(entries.len());
                for entry in entries {
                    if acks.send(AckToken { id: entry.id }).await.is_err() {
                        self.coordinator.done();
                    }
                }
            }
            Err(e) => {
                metrics::record_flush("abandoned", entries.len());
                tracing::warn!(
                    size = entries.len(),
                    error = %e,
                    "Flush failed, batch will be re-read from the pending list"
                );
                self.redelivery.raise(entries.into_iter().map(|entry| entry.id));
            }
        }
    }
}
