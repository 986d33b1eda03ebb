//! Stream ingestion pipeline: batching, acknowledgement ordering, shutdown.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::Instant;

use chat_core::application::ingest::{IngestConfig, IngestPipeline, PipelineHandle};

use crate::common::{chat_record, FakeStream, Journal, RecordingStore};

fn config(batch_size: usize) -> IngestConfig {
    IngestConfig {
        consumer_id: "message-saver-test".into(),
        batch_size,
        block: Duration::from_secs(1),
        ..IngestConfig::default()
    }
}

struct Harness {
    stream: Arc<FakeStream>,
    store: Arc<RecordingStore>,
    journal: Journal,
}

impl Harness {
    fn new() -> Self {
        let journal = Journal::default();
        Self {
            stream: FakeStream::new(journal.clone()),
            store: RecordingStore::new(journal.clone()),
            journal,
        }
    }

    async fn start(&self, config: IngestConfig) -> PipelineHandle {
        IngestPipeline::new(self.stream.clone(), self.store.clone(), config)
            .start()
            .await
            .unwrap()
    }

    async fn until(&self, what: &str, done: impl Fn(&Self) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while !done(self) {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn flushes_on_size_then_on_interval() {
    let harness = Harness::new();
    harness.stream.push_messages(0, 70);

    let started = Instant::now();
    let pipeline = harness.start(config(64)).await;
    harness
        .until("70 acks", |h| h.stream.acked().len() == 70)
        .await;

    assert_eq!(harness.store.batch_sizes(), vec![64, 6]);
    let instants = harness.store.batch_instants();
    assert!(instants[0] - started < Duration::from_millis(100));
    let second = instants[1] - started;
    assert!(second >= Duration::from_secs(3), "second flush after {second:?}");
    assert!(second < Duration::from_millis(3500), "second flush after {second:?}");

    pipeline.shutdown().await.unwrap();
    assert_eq!(harness.stream.groups_ensured(), 1);
}

#[tokio::test(start_paused = true)]
async fn entries_are_acknowledged_only_after_their_batch_is_stored() {
    let harness = Harness::new();
    harness.stream.push_messages(0, 10);

    let pipeline = harness.start(config(4)).await;
    harness
        .until("10 acks", |h| h.stream.acked().len() == 10)
        .await;
    pipeline.shutdown().await.unwrap();

    let journal = harness.journal.lock().clone();
    for (position, line) in journal.iter().enumerate() {
        if let Some(id) = line.strip_prefix("ack:") {
            let saved = journal
                .iter()
                .position(|l| l == &format!("save:{id}"))
                .unwrap_or_else(|| panic!("{id} acknowledged but never stored"));
            assert!(saved < position, "{id} acknowledged before it was stored");
        }
    }
    let acks = journal.iter().filter(|l| l.starts_with("ack:")).count();
    assert_eq!(acks, 10);
}

#[tokio::test(start_paused = true)]
async fn failed_flush_entries_are_redelivered_once_storage_recovers() {
    let harness = Harness::new();
    harness.store.failing(true);
    harness.stream.push_messages(0, 5);

    let pipeline = harness.start(config(64)).await;
    tokio::time::sleep(Duration::from_secs(4)).await;

    assert_eq!(harness.store.stored(), 0);
    assert!(harness.stream.acked().is_empty());
    assert_eq!(pipeline.coordinator().outstanding(), 0);

    harness.store.failing(false);
    harness.until("5 acks", |h| h.stream.acked().len() == 5).await;

    let ids: Vec<String> = (0..5).map(|i| format!("{i}-0")).collect();
    assert_eq!(harness.stream.acked(), ids);
    assert_eq!(harness.store.stored(), 5);
    assert!(harness.stream.pending().is_empty());

    pipeline.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn entries_claimed_after_a_failed_flush_are_acknowledged_once() {
    let harness = Harness::new();
    harness.store.failing(true);
    harness.stream.push_messages(0, 2);

    let pipeline = harness
        .start(IngestConfig {
            claim_count: 2,
            ..config(2)
        })
        .await;
    harness
        .until("failed flush", |h| h.store.failed_flushes() >= 1)
        .await;

    // Claimed while 0-0 and 1-0 wait to be re-read from the pending list.
    harness.store.failing(false);
    harness.stream.push_messages(2, 2);
    harness.until("4 acks", |h| h.stream.acked().len() == 4).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    pipeline.shutdown().await.unwrap();

    let mut acked = harness.stream.acked();
    acked.sort();
    assert_eq!(acked, vec!["0-0", "1-0", "2-0", "3-0"]);
    let saves = harness
        .journal
        .lock()
        .iter()
        .filter(|line| line.starts_with("save:"))
        .count();
    assert_eq!(saves, 4);
    assert!(harness.stream.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn entries_left_pending_by_a_previous_run_are_recovered_on_start() {
    let harness = Harness::new();
    harness.stream.push_messages(0, 3);
    harness.stream.deliver(3);
    harness.stream.push_messages(3, 1);

    let pipeline = harness.start(config(64)).await;
    harness.until("4 acks", |h| h.stream.acked().len() == 4).await;
    pipeline.shutdown().await.unwrap();

    assert_eq!(harness.store.stored(), 4);
    assert!(harness.stream.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn malformed_entries_are_skipped_and_left_pending() {
    let harness = Harness::new();
    let mut broken = chat_record("1-0", "c1", "lost");
    broken.fields.remove("content");
    harness.stream.push(broken);
    harness.stream.push(chat_record("2-0", "c1", "a"));
    harness.stream.push(chat_record("3-0", "c1", "b"));

    let pipeline = harness.start(config(2)).await;
    harness.until("2 acks", |h| h.stream.acked().len() == 2).await;
    pipeline.shutdown().await.unwrap();

    assert_eq!(harness.store.batch_sizes(), vec![2]);
    assert_eq!(harness.stream.pending(), vec!["1-0".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_flushes_buffer_and_waits_for_acknowledgements() {
    let harness = Harness::new();
    harness.stream.slow_acks(Duration::from_millis(500));
    harness.stream.push_messages(0, 5);

    let pipeline = harness.start(config(64)).await;
    harness
        .until("entries claimed", |h| h.stream.pending().len() == 5)
        .await;

    pipeline.shutdown().await.unwrap();

    assert_eq!(harness.store.batch_sizes(), vec![5]);
    assert_eq!(harness.stream.acked().len(), 5);
    assert!(harness.stream.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_gives_up_on_acknowledgements_after_timeout() {
    let harness = Harness::new();
    harness.stream.slow_acks(Duration::from_secs(3600));
    harness.stream.push_messages(0, 2);

    let pipeline = harness
        .start(IngestConfig {
            ack_wait_timeout: Duration::from_secs(1),
            ..config(2)
        })
        .await;
    harness.until("batch stored", |h| h.store.stored() == 2).await;
    assert_eq!(pipeline.coordinator().outstanding(), 2);

    let stopping = Instant::now();
    pipeline.shutdown().await.unwrap();
    let waited = stopping.elapsed();

    assert!(waited >= Duration::from_secs(1));
    assert!(waited < Duration::from_secs(2));
    assert!(harness.stream.acked().is_empty());
    assert_eq!(harness.stream.pending().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_is_bounded_when_acknowledgements_back_up() {
    let harness = Harness::new();
    harness.stream.slow_acks(Duration::from_secs(3600));
    harness.stream.push_messages(0, 4);

    // One-slot queues: the second batch's tokens cannot all be handed on,
    // so the saver is parked on the acknowledgement queue.
    let pipeline = harness
        .start(IngestConfig {
            queue_capacity: 1,
            ack_wait_timeout: Duration::from_secs(1),
            ..config(2)
        })
        .await;
    harness.until("both batches stored", |h| h.store.stored() == 4).await;
    assert_eq!(pipeline.coordinator().outstanding(), 4);

    let stopping = Instant::now();
    pipeline.shutdown().await.unwrap();
    let waited = stopping.elapsed();

    assert!(waited < Duration::from_secs(2), "shutdown took {waited:?}");
    assert!(harness.stream.acked().is_empty());
    assert_eq!(harness.stream.pending().len(), 4);
}
