//! Outbox Relay
//!
//! Periodic task driving an [`OutboxProcessor`]. A failing or slow tick is
//! logged and never blocks the next one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

use super::processor::{OutboxProcessor, RelayError};
use crate::config::OutboxSettings;
use crate::domain::{
    Broker, ClaimFilter, OutboxRepository, OutboxStatus, UnitOfWork, MESSAGE_ENTITY,
};
use crate::shared::signal;

/// Relay tuning.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub entity_name: String,
    pub batch_limit: i64,
    pub poll_interval: Duration,
    pub tick_timeout: Duration,
    pub status: OutboxStatus,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            entity_name: MESSAGE_ENTITY.into(),
            batch_limit: 10,
            poll_interval: Duration::from_secs(1),
            tick_timeout: Duration::from_secs(10),
            status: OutboxStatus::Pending,
        }
    }
}

impl From<&OutboxSettings> for RelayConfig {
    fn from(settings: &OutboxSettings) -> Self {
        Self {
            entity_name: settings.entity_name.clone(),
            batch_limit: settings.batch_limit,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            tick_timeout: Duration::from_millis(settings.tick_timeout_ms),
            status: OutboxStatus::Pending,
        }
    }
}

impl RelayConfig {
    /// Variant that re-publishes rows previously marked failed, polling
    /// `slowdown` times less often.
    pub fn reprocessing_failed(&self, slowdown: u32) -> Self {
        Self {
            status: OutboxStatus::Failed,
            poll_interval: self.poll_interval * slowdown,
            ..self.clone()
        }
    }

    pub fn claim_filter(&self) -> ClaimFilter {
        ClaimFilter {
            entity_name: self.entity_name.clone(),
            status: self.status,
            limit: self.batch_limit,
        }
    }
}

pub struct OutboxRelay;

impl OutboxRelay {
    /// Spawn the periodic task.
    pub fn spawn<U, O, B>(processor: Arc<OutboxProcessor<U, O, B>>, config: &RelayConfig) -> RelayHandle
    where
        U: UnitOfWork + 'static,
        U::Tx: 'static,
        O: OutboxRepository<U::Tx> + 'static,
        B: Broker + 'static,
    {
        let (shutdown, stop) = watch::channel(false);
        let task = tokio::spawn(run(processor, config.clone(), stop));
        RelayHandle { shutdown, task }
    }
}

async fn run<U, O, B>(
    processor: Arc<OutboxProcessor<U, O, B>>,
    config: RelayConfig,
    mut shutdown: watch::Receiver<bool>,
) where
    U: UnitOfWork,
    O: OutboxRepository<U::Tx>,
    B: Broker,
{
    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        entity = %config.entity_name,
        status = %config.status,
        interval_ms = config.poll_interval.as_millis() as u64,
        "Outbox relay started"
    );

    loop {
        tokio::select! {
            _ = signal::raised(&mut shutdown) => break,
            _ = ticker.tick() => {
                match timeout(config.tick_timeout, processor.process_batch()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(RelayError::Partial { report, failures })) => {
                        tracing::warn!(
                            claimed = report.claimed,
                            failed = failures.len(),
                            "Outbox batch settled with failures"
                        );
                    }
                    Ok(Err(e)) => tracing::error!(error = %e, "Outbox tick failed"),
                    Err(_) => tracing::warn!(
                        timeout_ms = config.tick_timeout.as_millis() as u64,
                        "Outbox tick timed out"
                    ),
                }
            }
        }
    }

    tracing::info!(entity = %config.entity_name, "Outbox relay stopped");
}

/// Handle to a running relay.
pub struct RelayHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// Signal the relay and wait for the in-flight tick, if any, to finish.
    pub async fn stop(self, grace: Duration) {
        self.shutdown.send_replace(true);
        let mut task = self.task;
        match timeout(grace, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Outbox relay task failed"),
            Err(_) => {
                tracing::warn!("Outbox relay did not stop in time, aborting");
                task.abort();
            }
        }
    }
}
