//! Common Test Utilities
//!
//! In-memory stand-ins for Postgres and Redis, plus a scripted WebSocket
//! client for driving the hub.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::channel::mpsc as fmpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use chat_core::domain::{
    Broker, BrokerMessage, ClaimFilter, ConsumerGroup, MessageRepository, MessageStream, Notifier,
    OutboxRecord, OutboxRepository, OutboxStatus, StreamEntry, StreamRecord, UnitOfWork,
};
use chat_core::presentation::websocket::{ConnectionHub, Frame, HubError, SessionId};
use chat_core::shared::error::AppError;

mockall::mock! {
    pub Publisher {}

    #[async_trait]
    impl Broker for Publisher {
        async fn publish(&self, message: BrokerMessage) -> Result<(), AppError>;
    }
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Transaction over [`InMemoryOutbox`]: writes are buffered until commit and
/// claimed rows stay locked until the transaction ends. Dropping it
/// releases the locks and discards the writes, like a rollback.
#[derive(Debug)]
pub struct OutboxTx {
    inserts: Vec<OutboxRecord>,
    updates: Vec<(Uuid, OutboxStatus)>,
    locked: Vec<Uuid>,
    locks: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for OutboxTx {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        for id in &self.locked {
            locks.remove(id);
        }
    }
}

/// Outbox table with row locks that concurrent claims skip.
#[derive(Default)]
pub struct InMemoryOutbox {
    rows: Mutex<Vec<OutboxRecord>>,
    locks: Arc<Mutex<HashSet<Uuid>>>,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    fail_inserts: AtomicBool,
}

impl InMemoryOutbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, entity: &str, count: usize) -> Vec<Uuid> {
        let mut rows = self.rows.lock();
        (0..count)
            .map(|i| {
                let record = OutboxRecord::pending(entity, format!("payload-{i}").into_bytes());
                let id = record.id;
                rows.push(record);
                id
            })
            .collect()
    }

    pub fn rows(&self) -> Vec<OutboxRecord> {
        self.rows.lock().clone()
    }

    pub fn status_of(&self, id: Uuid) -> Option<OutboxStatus> {
        self.rows.lock().iter().find(|r| r.id == id).map(|r| r.status)
    }

    pub fn count(&self, status: OutboxStatus) -> usize {
        self.rows.lock().iter().filter(|r| r.status == status).count()
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn locked(&self) -> usize {
        self.locks.lock().len()
    }
}

#[async_trait]
impl UnitOfWork for InMemoryOutbox {
    type Tx = OutboxTx;

    async fn begin(&self) -> Result<OutboxTx, AppError> {
        Ok(OutboxTx {
            inserts: Vec::new(),
            updates: Vec::new(),
            locked: Vec::new(),
            locks: self.locks.clone(),
        })
    }

    async fn commit(&self, tx: OutboxTx) -> Result<(), AppError> {
        {
            let mut rows = self.rows.lock();
            rows.extend(tx.inserts.iter().cloned());
            for (id, status) in &tx.updates {
                if let Some(row) = rows.iter_mut().find(|r| r.id == *id) {
                    row.status = *status;
                }
            }
        }
        drop(tx);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self, tx: OutboxTx) -> Result<(), AppError> {
        drop(tx);
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository<OutboxTx> for InMemoryOutbox {
    async fn insert(&self, tx: &mut OutboxTx, record: &OutboxRecord) -> Result<(), AppError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("outbox table".into()));
        }
        tx.inserts.push(record.clone());
        Ok(())
    }

    async fn claim(
        &self,
        tx: &mut OutboxTx,
        filter: &ClaimFilter,
    ) -> Result<Vec<OutboxRecord>, AppError> {
        let rows = self.rows.lock();
        let mut locks = self.locks.lock();

        let mut candidates: Vec<&OutboxRecord> = rows
            .iter()
            .filter(|r| r.status == filter.status && r.entity_name == filter.entity_name)
            .filter(|r| !locks.contains(&r.id))
            .collect();
        candidates.sort_by_key(|r| (r.created_at, r.id));

        let claimed: Vec<OutboxRecord> = candidates
            .into_iter()
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect();
        for record in &claimed {
            locks.insert(record.id);
            tx.locked.push(record.id);
        }
        Ok(claimed)
    }

    async fn set_status(
        &self,
        tx: &mut OutboxTx,
        id: Uuid,
        status: OutboxStatus,
    ) -> Result<(), AppError> {
        tx.updates.push((id, status));
        Ok(())
    }
}

/// Broker that records every message and can be slowed down.
#[derive(Default)]
pub struct RecordingBroker {
    published: Mutex<Vec<BrokerMessage>>,
    delay: Option<Duration>,
    stall_first: AtomicBool,
}

impl RecordingBroker {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// The first publish hangs for an hour; later ones succeed at once.
    pub fn stalling_once() -> Self {
        Self {
            stall_first: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<BrokerMessage> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn publish(&self, message: BrokerMessage) -> Result<(), AppError> {
        if self.stall_first.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.published.lock().push(message);
        Ok(())
    }
}

/// Notifier that remembers what it was asked to fan out.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, topic: &str, payload: Value) -> Result<(), AppError> {
        self.sent.lock().push((topic.to_string(), payload));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stream and message store
// ---------------------------------------------------------------------------

/// Shared ordering log of saves and acks.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Consumer-group stream held in memory. Delivered entries stay pending
/// until acknowledged.
pub struct FakeStream {
    undelivered: Mutex<VecDeque<StreamRecord>>,
    pending: Mutex<Vec<StreamRecord>>,
    acked: Mutex<Vec<String>>,
    groups: AtomicUsize,
    arrivals: Notify,
    ack_delay: Mutex<Option<Duration>>,
    journal: Journal,
}

impl FakeStream {
    pub fn new(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            undelivered: Mutex::default(),
            pending: Mutex::default(),
            acked: Mutex::default(),
            groups: AtomicUsize::new(0),
            arrivals: Notify::new(),
            ack_delay: Mutex::new(None),
            journal,
        })
    }

    pub fn push(&self, record: StreamRecord) {
        self.undelivered.lock().push_back(record);
        self.arrivals.notify_one();
    }

    /// Append `count` well-formed chat entries with ids `{start}-0`...
    pub fn push_messages(&self, start: usize, count: usize) {
        for i in start..start + count {
            self.push(chat_record(&format!("{i}-0"), "c1", &format!("message {i}")));
        }
    }

    /// Move up to `count` entries straight to the pending list, as a run
    /// that claimed them and died before acknowledging would leave them.
    pub fn deliver(&self, count: usize) {
        let mut undelivered = self.undelivered.lock();
        let take = count.min(undelivered.len());
        self.pending.lock().extend(undelivered.drain(..take));
    }

    pub fn slow_acks(&self, delay: Duration) {
        *self.ack_delay.lock() = Some(delay);
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().clone()
    }

    pub fn pending(&self) -> Vec<String> {
        self.pending.lock().iter().map(|r| r.id.clone()).collect()
    }

    pub fn groups_ensured(&self) -> usize {
        self.groups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageStream for FakeStream {
    async fn ensure_group(&self, _group: &ConsumerGroup) -> Result<(), AppError> {
        self.groups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_group(
        &self,
        _group: &ConsumerGroup,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamRecord>, AppError> {
        let deadline = Instant::now() + block;
        loop {
            {
                let mut undelivered = self.undelivered.lock();
                if !undelivered.is_empty() {
                    let take = count.min(undelivered.len());
                    let records: Vec<StreamRecord> = undelivered.drain(..take).collect();
                    self.pending.lock().extend(records.iter().cloned());
                    return Ok(records);
                }
            }
            if tokio::time::timeout_at(deadline, self.arrivals.notified())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    async fn read_pending(
        &self,
        _group: &ConsumerGroup,
        after: &str,
        count: usize,
    ) -> Result<Vec<StreamRecord>, AppError> {
        // "0" reads from the beginning, which here includes id "0-0".
        let after = (after != "0").then(|| stream_order(after));
        let mut pending: Vec<StreamRecord> = self
            .pending
            .lock()
            .iter()
            .filter(|r| Some(stream_order(&r.id)) > after)
            .cloned()
            .collect();
        pending.sort_by_key(|r| stream_order(&r.id));
        pending.truncate(count);
        Ok(pending)
    }

    async fn ack(&self, _group: &ConsumerGroup, id: &str) -> Result<(), AppError> {
        let delay = *self.ack_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.pending.lock().retain(|pending| pending.id != id);
        self.acked.lock().push(id.to_string());
        self.journal.lock().push(format!("ack:{id}"));
        Ok(())
    }
}

/// `ms-seq` ids ordered the way the stream orders them.
fn stream_order(id: &str) -> (u64, u64) {
    let (ms, seq) = id.split_once('-').unwrap_or((id, "0"));
    (ms.parse().unwrap_or(0), seq.parse().unwrap_or(0))
}

/// Message store recording each batch and the paused-clock instant it landed.
pub struct RecordingStore {
    batches: Mutex<Vec<(Instant, Vec<StreamEntry>)>>,
    stored: Mutex<HashSet<String>>,
    failing: AtomicBool,
    failures: AtomicUsize,
    journal: Journal,
}

impl RecordingStore {
    pub fn new(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::default(),
            stored: Mutex::default(),
            failing: AtomicBool::new(false),
            failures: AtomicUsize::new(0),
            journal,
        })
    }

    pub fn failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn failed_flushes(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(|(_, b)| b.len()).collect()
    }

    pub fn batch_instants(&self) -> Vec<Instant> {
        self.batches.lock().iter().map(|(at, _)| *at).collect()
    }

    pub fn stored(&self) -> usize {
        self.stored.lock().len()
    }
}

#[async_trait]
impl MessageRepository for RecordingStore {
    async fn save_batch(&self, entries: &[StreamEntry]) -> Result<u64, AppError> {
        if self.failing.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(AppError::Unavailable("messages table".into()));
        }
        let mut stored = self.stored.lock();
        let mut inserted = 0;
        for entry in entries {
            if stored.insert(entry.id.clone()) {
                inserted += 1;
            }
            self.journal.lock().push(format!("save:{}", entry.id));
        }
        self.batches
            .lock()
            .push((Instant::now(), entries.to_vec()));
        Ok(inserted)
    }
}

pub fn chat_record(id: &str, chat_id: &str, content: &str) -> StreamRecord {
    let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let fields = [
        ("event", "sent-message-event".to_string()),
        ("user_id", "u1".to_string()),
        ("chat_id", chat_id.to_string()),
        ("content", content.to_string()),
        ("timestamp", timestamp.to_rfc3339()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    StreamRecord {
        id: id.to_string(),
        fields,
    }
}

// ---------------------------------------------------------------------------
// WebSocket client
// ---------------------------------------------------------------------------

/// A connected session seen from the client side.
pub struct TestClient {
    pub id: SessionId,
    inbound: fmpsc::UnboundedSender<Result<Frame, Infallible>>,
    outbound: fmpsc::UnboundedReceiver<Frame>,
}

impl TestClient {
    pub fn connect(hub: &ConnectionHub, topics: &[&str]) -> Result<Self, HubError> {
        let (inbound, stream) = fmpsc::unbounded();
        let (sink, outbound) = fmpsc::unbounded();
        let id = hub.connect(topics.iter().map(|t| t.to_string()).collect(), stream, sink)?;
        Ok(Self {
            id,
            inbound,
            outbound,
        })
    }

    pub fn send(&self, text: &str) {
        let _ = self.inbound.unbounded_send(Ok(Frame::Text(text.to_string())));
    }

    /// Next text frame as JSON, skipping pings. `None` on close or silence.
    pub async fn next_json(&mut self, wait: Duration) -> Option<Value> {
        let deadline = Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.outbound.next()).await {
                Ok(Some(Frame::Text(text))) => return serde_json::from_str(&text).ok(),
                Ok(Some(Frame::Ping(_) | Frame::Pong(_))) => continue,
                Ok(Some(Frame::Close)) | Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Wait until the server side has closed the connection.
    pub async fn closed(&mut self, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.outbound.next()).await {
                Ok(Some(Frame::Close)) | Ok(None) => return true,
                Ok(Some(_)) => continue,
                Err(_) => return false,
            }
        }
    }

    pub fn hang_up(&self) {
        let _ = self.inbound.unbounded_send(Ok(Frame::Close));
    }
}

/// A client whose socket accepts one frame and then never drains.
pub struct StalledClient {
    pub id: SessionId,
    _inbound: fmpsc::UnboundedSender<Result<Frame, Infallible>>,
    _outbound: fmpsc::Receiver<Frame>,
}

impl StalledClient {
    pub fn connect(hub: &ConnectionHub, topics: &[&str]) -> Result<Self, HubError> {
        let (inbound, stream) = fmpsc::unbounded();
        let (sink, outbound) = fmpsc::channel(0);
        let id = hub.connect(topics.iter().map(|t| t.to_string()).collect(), stream, sink)?;
        Ok(Self {
            id,
            _inbound: inbound,
            _outbound: outbound,
        })
    }
}
