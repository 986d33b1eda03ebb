//! Acknowledger stage: confirms consumption of durably written entries.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{AckCoordinator, AckToken};
use crate::domain::{ConsumerGroup, MessageStream};
use crate::infrastructure::metrics;

pub struct Acknowledger<S: MessageStream> {
    stream: Arc<S>,
    group: ConsumerGroup,
    coordinator: AckCoordinator,
}

impl<S: MessageStream> Acknowledger<S> {
    pub fn new(stream: Arc<S>, group: ConsumerGroup, coordinator: AckCoordinator) -> Self {
        Self {
            stream,
            group,
            coordinator,
        }
    }

    /// Acknowledge every token until the queue closes. The obligation is
    /// resolved whether or not the stream accepted the acknowledgement;
    /// the entry is already stored, so the worst case is a redelivery.
    pub async fn run(self, mut tokens: mpsc::Receiver<AckToken>) {
        while let Some(token) = tokens.recv().await {
            match self.stream.ack(&self.group, &token.id).await {
                Ok(()) => metrics::record_ack("acked"),
                Err(e) => {
                    metrics::record_ack("failed");
                    tracing::warn!(entry_id = %token.id, error = %e, "Acknowledgement failed");
                }
            }
            self.coordinator.done();
        }
        tracing::info!("Acknowledger stopped");
    }
}
