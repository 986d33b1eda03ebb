//! Pipeline assembly and ordered shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

use super::{
    AckCoordinator, AckToken, Acknowledger, BatchSaver, IngestError, RedeliveryRequest, Subscriber,
};
use crate::config::IngestSettings;
use crate::domain::{ConsumerGroup, MessageRepository, MessageStream};

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub stream_name: String,
    pub group_name: String,
    pub consumer_id: String,
    pub claim_count: usize,
    pub block: Duration,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub queue_capacity: usize,
    pub ack_wait_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            stream_name: "sent-message".into(),
            group_name: "messages-for-save".into(),
            consumer_id: "message-saver-0".into(),
            claim_count: 10,
            block: Duration::from_secs(5),
            batch_size: 64,
            flush_interval: Duration::from_secs(3),
            queue_capacity: 1024,
            ack_wait_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&IngestSettings> for IngestConfig {
    fn from(settings: &IngestSettings) -> Self {
        Self {
            stream_name: settings.stream_name.clone(),
            group_name: settings.group_name.clone(),
            consumer_id: settings.consumer_name.clone(),
            claim_count: settings.claim_count,
            block: Duration::from_millis(settings.block_ms),
            batch_size: settings.batch_size,
            flush_interval: Duration::from_millis(settings.flush_interval_ms),
            queue_capacity: settings.queue_capacity,
            ack_wait_timeout: settings.ack_wait_timeout(),
        }
    }
}

impl IngestConfig {
    pub fn consumer_group(&self) -> ConsumerGroup {
        ConsumerGroup {
            stream: self.stream_name.clone(),
            group: self.group_name.clone(),
            consumer: self.consumer_id.clone(),
        }
    }
}

pub struct IngestPipeline<S, R>
where
    S: MessageStream,
    R: MessageRepository,
{
    stream: Arc<S>,
    repository: Arc<R>,
    config: IngestConfig,
}

impl<S, R> IngestPipeline<S, R>
where
    S: MessageStream + 'static,
    R: MessageRepository + 'static,
{
    pub fn new(stream: Arc<S>, repository: Arc<R>, config: IngestConfig) -> Self {
        Self {
            stream,
            repository,
            config,
        }
    }

    /// Ensure the consumer group exists, then spawn one task per stage.
    pub async fn start(self) -> Result<PipelineHandle, IngestError> {
        let group = self.config.consumer_group();
        let coordinator = AckCoordinator::new();
        let redelivery = RedeliveryRequest::default();

        let subscriber = Subscriber::new(
            self.stream.clone(),
            group.clone(),
            redelivery.clone(),
            self.config.claim_count,
            self.config.block,
        );
        subscriber.prepare().await?;

        let saver = BatchSaver::new(
            self.repository,
            coordinator.clone(),
            redelivery,
            self.config.batch_size,
            self.config.flush_interval,
        );
        let acknowledger = Acknowledger::new(self.stream, group.clone(), coordinator.clone());

        let (entries_tx, entries_rx) = mpsc::channel(self.config.queue_capacity);
        let (acks_tx, acks_rx) = mpsc::channel(self.config.queue_capacity);
        let (shutdown, signal) = watch::channel(false);

        let subscriber = tokio::spawn(subscriber.run(entries_tx, signal));
        let saver = tokio::spawn(saver.run(entries_rx, acks_tx.clone()));
        let acknowledger = tokio::spawn(acknowledger.run(acks_rx));

        tracing::info!(
            stream = %group.stream,
            group = %group.group,
            consumer = %group.consumer,
            "Ingest pipeline started"
        );

        Ok(PipelineHandle {
            shutdown,
            subscriber,
            saver,
            acknowledger,
            acks: Some(acks_tx),
            coordinator,
            ack_wait_timeout: self.config.ack_wait_timeout,
        })
    }
}

/// Running pipeline.
pub struct PipelineHandle {
    shutdown: watch::Sender<bool>,
    subscriber: JoinHandle<()>,
    saver: JoinHandle<()>,
    acknowledger: JoinHandle<()>,
    // Held so the acknowledgement queue stays open until outstanding
    // obligations have drained.
    acks: Option<mpsc::Sender<AckToken>>,
    coordinator: AckCoordinator,
    ack_wait_timeout: Duration,
}

impl PipelineHandle {
    pub fn coordinator(&self) -> &AckCoordinator {
        &self.coordinator
    }

    /// Stop claiming, let the saver drain and flush, wait for every
    /// obligation to resolve, and only then close the acknowledgement queue.
    ///
    /// The whole sequence shares one deadline, `ack_wait_timeout` from now.
    /// A stage still running at the deadline is aborted; its unacknowledged
    /// entries stay pending in the stream for the next run.
    pub async fn shutdown(mut self) -> Result<(), IngestError> {
        let deadline = Instant::now() + self.ack_wait_timeout;
        self.shutdown.send_replace(true);

        join_stage("subscriber", self.subscriber, deadline).await?;
        join_stage("batch saver", self.saver, deadline).await?;

        let drained = self
            .coordinator
            .wait_timeout(deadline.saturating_duration_since(Instant::now()))
            .await;
        drop(self.acks.take());

        match drained {
            Ok(()) => {
                join_stage("acknowledger", self.acknowledger, deadline).await?;
                tracing::info!("Ingest pipeline stopped");
                Ok(())
            }
            Err(outstanding) => {
                tracing::warn!(
                    outstanding,
                    "Timed out waiting for acknowledgements, abandoning them"
                );
                self.acknowledger.abort();
                Ok(())
            }
        }
    }
}

async fn join_stage(
    name: &'static str,
    mut task: JoinHandle<()>,
    deadline: Instant,
) -> Result<(), IngestError> {
    match timeout_at(deadline, &mut task).await {
        Ok(joined) => joined.map_err(|e| {
            tracing::error!(stage = name, error = %e, "Ingest stage ended abnormally");
            IngestError::StageFailed {
                stage: name,
                reason: e.to_string(),
            }
        }),
        Err(_) => {
            tracing::warn!(stage = name, "Ingest stage did not stop in time, aborting");
            task.abort();
            Ok(())
        }
    }
}
