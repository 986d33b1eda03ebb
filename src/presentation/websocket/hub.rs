//! Connection Hub
//!
//! Owns the live sessions and their topic index, routes inbound operations
//! and fans broadcasts out to subscribers.
//!
//! Sessions never hold a reference to the hub itself. They receive a
//! [`HubLink`], which carries the shared index (for self-removal) and the
//! operation intake.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, Stream};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use uuid::Uuid;

use super::index::TopicIndex;
use super::messages::{OperationRequest, OperationResponse};
use super::operation::{
    Operation, OperationError, OperationKind, OperationResult, RetryDecision, SessionId,
};
use super::router::OperationRouter;
use super::session::{self, EnqueueError, Frame, SessionHandle, SessionTimings};
use crate::config::HubSettings;
use crate::domain::Notifier;
use crate::infrastructure::metrics;
use crate::shared::error::AppError;
use crate::shared::signal;

/// Extra time a session waits past the deadline for the hub's answer.
const RESPONSE_GRACE: Duration = Duration::from_secs(1);

pub type SessionIndex = RwLock<TopicIndex>;

/// Hub tuning.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub outbound_queue_capacity: usize,
    pub intake_capacity: usize,
    pub operation_timeout: Duration,
    pub max_retries: u32,
    pub ping_period: Duration,
    pub pong_wait: Duration,
    pub write_wait: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            intake_capacity: 1024,
            operation_timeout: Duration::from_secs(5),
            max_retries: 3,
            ping_period: Duration::from_secs(9),
            pong_wait: Duration::from_secs(10),
            write_wait: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&HubSettings> for HubConfig {
    fn from(settings: &HubSettings) -> Self {
        Self {
            outbound_queue_capacity: settings.outbound_queue_capacity,
            intake_capacity: settings.intake_capacity,
            operation_timeout: settings.operation_timeout(),
            max_retries: settings.max_retries,
            ping_period: Duration::from_millis(settings.ping_period_ms),
            pong_wait: Duration::from_millis(settings.pong_wait_ms),
            write_wait: Duration::from_millis(settings.write_wait_ms),
            shutdown_timeout: settings.shutdown_timeout(),
        }
    }
}

impl HubConfig {
    fn timings(&self) -> SessionTimings {
        SessionTimings {
            ping_period: self.ping_period,
            pong_wait: self.pong_wait,
            write_wait: self.write_wait,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("hub is closed")]
    Closed,

    #[error("hub already started")]
    AlreadyStarted,

    #[error("timed out waiting for session tasks to finish")]
    ShutdownTimedOut,
}

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

#[derive(Debug)]
struct BroadcastInstruction {
    topic: String,
    payload: Arc<str>,
}

type Intakes = (mpsc::Receiver<Operation>, mpsc::Receiver<BroadcastInstruction>);

struct HubInner {
    config: HubConfig,
    index: Arc<SessionIndex>,
    router: OnceCell<Arc<OperationRouter>>,
    operations: mpsc::Sender<Operation>,
    broadcasts: mpsc::Sender<BroadcastInstruction>,
    intakes: Mutex<Option<Intakes>>,
    closing: watch::Sender<bool>,
    // Every session and dispatch task holds a clone; shutdown drops this one
    // and waits for the channel to report no senders left.
    tracker: Mutex<Option<mpsc::Sender<()>>>,
    tracker_done: tokio::sync::Mutex<mpsc::Receiver<()>>,
    run_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct ConnectionHub {
    inner: Arc<HubInner>,
}

impl ConnectionHub {
    pub fn new(config: HubConfig) -> Self {
        let (operations, operations_rx) = mpsc::channel(config.intake_capacity);
        let (broadcasts, broadcasts_rx) = mpsc::channel(config.intake_capacity);
        let (tracker, tracker_done) = mpsc::channel(1);
        let (closing, _) = watch::channel(false);

        Self {
            inner: Arc::new(HubInner {
                config,
                index: Arc::new(RwLock::new(TopicIndex::new())),
                router: OnceCell::new(),
                operations,
                broadcasts,
                intakes: Mutex::new(Some((operations_rx, broadcasts_rx))),
                closing,
                tracker: Mutex::new(Some(tracker)),
                tracker_done: tokio::sync::Mutex::new(tracker_done),
                run_task: Mutex::new(None),
            }),
        }
    }

    /// Start consuming the operation and broadcast intakes.
    pub fn start(&self, router: OperationRouter) -> Result<(), HubError> {
        let (operations, broadcasts) = self
            .inner
            .intakes
            .lock()
            .take()
            .ok_or(HubError::AlreadyStarted)?;
        if self.is_closing() {
            return Err(HubError::Closed);
        }
        self.inner
            .router
            .set(Arc::new(router))
            .map_err(|_| HubError::AlreadyStarted)?;

        let hub = self.clone();
        let task = tokio::spawn(hub.run(operations, broadcasts));
        *self.inner.run_task.lock() = Some(task);
        tracing::info!("Connection hub started");
        Ok(())
    }

    async fn run(
        self,
        mut operations: mpsc::Receiver<Operation>,
        mut broadcasts: mpsc::Receiver<BroadcastInstruction>,
    ) {
        let mut closing = self.inner.closing.subscribe();

        loop {
            tokio::select! {
                biased;
                _ = signal::raised(&mut closing) => break,
                Some(operation) = operations.recv() => self.spawn_dispatch(operation),
                Some(instruction) = broadcasts.recv() => {
                    self.broadcast(&instruction.topic, instruction.payload);
                }
                else => break,
            }
        }

        operations.close();
        while let Ok(operation) = operations.try_recv() {
            operation.respond(Err(OperationError::HubClosed));
        }
        broadcasts.close();
        tracing::debug!("Hub intake closed");
    }

    fn spawn_dispatch(&self, operation: Operation) {
        let Some(guard) = self.inner.tracker.lock().clone() else {
            operation.respond(Err(OperationError::HubClosed));
            return;
        };
        let hub = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            hub.dispatch(operation).await;
        });
    }

    /// Run one attempt of `operation` and either answer it or, on a
    /// retryable failure, resubmit it to the intake.
    pub async fn dispatch(&self, mut operation: Operation) {
        let Some(router) = self.inner.router.get() else {
            operation.respond(Err(OperationError::HubClosed));
            return;
        };

        let error = match router.route(&operation).await {
            Ok(data) => {
                metrics::record_operation(operation.kind.as_str(), "success");
                operation.respond(Ok(data));
                return;
            }
            Err(error) => error,
        };

        match operation.retry.on_failure(&error) {
            RetryDecision::GiveUp => {
                metrics::record_operation(operation.kind.as_str(), "failure");
                tracing::debug!(
                    session_id = %operation.session_id,
                    request_id = operation.request_id,
                    retries = operation.retry.retries(),
                    error = %error,
                    "Operation failed"
                );
                operation.respond(Err(error));
            }
            RetryDecision::Retry { attempt } => {
                metrics::record_operation(operation.kind.as_str(), "retry");
                tracing::debug!(
                    session_id = %operation.session_id,
                    request_id = operation.request_id,
                    attempt,
                    error = %error,
                    "Retrying operation"
                );
                self.resubmit(operation, attempt, error).await;
            }
        }
    }

    async fn resubmit(&self, operation: Operation, attempt: u32, last_error: OperationError) {
        let wake = (Instant::now() + retry_backoff(attempt)).min(operation.deadline);
        tokio::time::sleep_until(wake).await;

        if operation.is_expired() {
            operation.respond(Err(OperationError::Timeout));
            return;
        }
        if self.is_closing() {
            tracing::debug!(error = %last_error, "Dropping retry, hub is closing");
            operation.respond(Err(OperationError::HubClosed));
            return;
        }

        match timeout_at(operation.deadline, self.inner.operations.reserve()).await {
            Ok(Ok(permit)) => permit.send(operation),
            Ok(Err(_)) => operation.respond(Err(OperationError::HubClosed)),
            Err(_) => operation.respond(Err(OperationError::Timeout)),
        }
    }

    /// Index an upgraded session under `topics`.
    pub fn admit<I>(&self, handle: SessionHandle, topics: I) -> Result<(), HubError>
    where
        I: IntoIterator<Item = String>,
    {
        let id = handle.id();
        let (is_new, active) = {
            let mut index = self.inner.index.write();
            let is_new = index.insert(handle, topics).map_err(|_| HubError::Closed)?;
            (is_new, index.len())
        };
        metrics::set_active_sessions(active);
        if is_new {
            tracing::info!(session_id = %id, active, "Session admitted");
        }
        Ok(())
    }

    /// Admit a new session over `stream`/`sink` and spawn its tasks.
    pub fn connect<S, K, E, W>(
        &self,
        topics: Vec<String>,
        stream: S,
        sink: K,
    ) -> Result<SessionId, HubError>
    where
        S: Stream<Item = Result<Frame, E>> + Send + 'static,
        K: Sink<Frame, Error = W> + Send + 'static,
        E: Display + Send + 'static,
        W: Display + Send + 'static,
    {
        let tracker = self.inner.tracker.lock().clone().ok_or(HubError::Closed)?;
        let id = Uuid::new_v4();
        let (handle, channels) =
            session::session_pair(id, self.inner.config.outbound_queue_capacity);

        self.admit(handle.clone(), topics)?;
        session::spawn(
            handle,
            channels,
            self.link(),
            stream,
            sink,
            self.inner.config.timings(),
            tracker,
        );
        Ok(id)
    }

    /// Remove a session from every topic and close it. Idempotent.
    pub fn remove(&self, id: &SessionId) -> bool {
        remove_session(&self.inner.index, id)
    }

    /// Enqueue `payload` on every session subscribed to `topic` without
    /// blocking. Sessions whose queue is full are evicted.
    pub fn broadcast(&self, topic: &str, payload: Arc<str>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut slow = Vec::new();
        let mut closing = Vec::new();

        {
            let index = self.inner.index.read();
            for session in index.subscribers(topic) {
                match session.try_enqueue(payload.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(EnqueueError::Full) => slow.push(session.id()),
                    Err(EnqueueError::Closed) => closing.push(session.id()),
                }
            }
        }

        for id in slow {
            if remove_session(&self.inner.index, &id) {
                report.evicted += 1;
                metrics::record_eviction();
                tracing::warn!(session_id = %id, topic, "Evicted slow session");
            }
        }
        // Already on their way out; just make sure they leave the index.
        for id in closing {
            remove_session(&self.inner.index, &id);
        }

        tracing::trace!(
            topic,
            delivered = report.delivered,
            evicted = report.evicted,
            "Broadcast fanned out"
        );
        report
    }

    pub fn link(&self) -> HubLink {
        HubLink {
            index: self.inner.index.clone(),
            operations: self.inner.operations.clone(),
            closing: self.inner.closing.subscribe(),
            operation_timeout: self.inner.config.operation_timeout,
            max_retries: self.inner.config.max_retries,
        }
    }

    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster {
            intake: self.inner.broadcasts.clone(),
            closing: self.inner.closing.subscribe(),
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.index.read().len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.index.read().subscriber_count(topic)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.inner.index.read().contains(id)
    }

    pub fn is_closing(&self) -> bool {
        *self.inner.closing.borrow()
    }

    /// Stop admitting, close the intakes, close every session, then wait for
    /// all session and dispatch tasks to finish or the shutdown timeout.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        let sessions = self.inner.index.write().seal();
        self.inner.closing.send_replace(true);
        for session in &sessions {
            session.close();
        }
        metrics::set_active_sessions(0);
        tracing::info!(sessions = sessions.len(), "Connection hub shutting down");
        drop(sessions);

        drop(self.inner.tracker.lock().take());
        let run_task = self.inner.run_task.lock().take();

        let drained = async {
            if let Some(task) = run_task {
                if let Err(e) = task.await {
                    tracing::error!(error = %e, "Hub loop ended abnormally");
                }
            }
            let mut done = self.inner.tracker_done.lock().await;
            while done.recv().await.is_some() {}
        };

        match timeout(self.inner.config.shutdown_timeout, drained).await {
            Ok(()) => {
                tracing::info!("Connection hub stopped");
                Ok(())
            }
            Err(_) => {
                tracing::warn!("Connection hub shutdown timed out, abandoning remaining tasks");
                Err(HubError::ShutdownTimedOut)
            }
        }
    }
}

fn remove_session(index: &SessionIndex, id: &SessionId) -> bool {
    let (removed, active) = {
        let mut index = index.write();
        let removed = index.remove(id);
        (removed, index.len())
    };

    match removed {
        Some(handle) => {
            handle.close();
            metrics::set_active_sessions(active);
            tracing::info!(session_id = %id, active, "Session removed");
            true
        }
        None => false,
    }
}

fn retry_backoff(attempt: u32) -> Duration {
    let base = 25u64 << attempt.min(6);
    let jitter = rand::rng().random_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

/// What a session holds instead of the hub.
#[derive(Clone)]
pub struct HubLink {
    index: Arc<SessionIndex>,
    operations: mpsc::Sender<Operation>,
    closing: watch::Receiver<bool>,
    operation_timeout: Duration,
    max_retries: u32,
}

impl HubLink {
    /// Handle one inbound text frame and produce the serialized response.
    pub async fn submit(&self, session_id: SessionId, text: &str) -> Arc<str> {
        let request = match OperationRequest::parse(text) {
            Ok(request) => request,
            Err((id, error)) => {
                metrics::record_operation("unknown", "rejected");
                return OperationResponse::failure(id, "", &error).to_text();
            }
        };

        let kind = match OperationKind::from_client(&request.operation) {
            Ok(kind) => kind,
            Err(error) => {
                metrics::record_operation("unknown", "rejected");
                return OperationResponse::failure(request.id, &request.operation, &error)
                    .to_text();
            }
        };

        let result = self
            .execute(session_id, request.id, kind, request.body)
            .await;
        OperationResponse::from_result(request.id, kind, result).to_text()
    }

    /// Hand an operation to the hub and wait for its single answer.
    pub async fn execute(
        &self,
        session_id: SessionId,
        request_id: i64,
        kind: OperationKind,
        body: Value,
    ) -> OperationResult {
        if *self.closing.borrow() {
            return Err(OperationError::HubClosed);
        }

        let (operation, response) = Operation::new(
            session_id,
            request_id,
            kind,
            body,
            self.operation_timeout,
            self.max_retries,
        );
        let deadline = operation.deadline;

        match timeout_at(deadline, self.operations.send(operation)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(OperationError::HubClosed),
            Err(_) => return Err(OperationError::Timeout),
        }

        match timeout_at(deadline + RESPONSE_GRACE, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OperationError::Canceled),
            Err(_) => Err(OperationError::Timeout),
        }
    }

    /// Remove the session from the index, then close it.
    pub fn release(&self, id: &SessionId) -> bool {
        remove_session(&self.index, id)
    }
}

/// Cloneable handle for pushing server-originated broadcasts into the hub.
#[derive(Clone)]
pub struct Broadcaster {
    intake: mpsc::Sender<BroadcastInstruction>,
    closing: watch::Receiver<bool>,
}

impl Broadcaster {
    /// Queue `data` for fan-out to `topic`, wrapped in the broadcast envelope.
    pub async fn broadcast(&self, topic: impl Into<String>, data: Value) -> Result<(), HubError> {
        if self.is_closed() {
            return Err(HubError::Closed);
        }
        let instruction = BroadcastInstruction {
            topic: topic.into(),
            payload: OperationResponse::broadcast(data).to_text(),
        };
        self.intake
            .send(instruction)
            .await
            .map_err(|_| HubError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        *self.closing.borrow()
    }
}

#[async_trait]
impl Notifier for Broadcaster {
    async fn notify(&self, topic: &str, payload: Value) -> Result<(), AppError> {
        self.broadcast(topic, payload)
            .await
            .map_err(|e| AppError::Unavailable(e.to_string()))
    }
}
