//! Prometheus Metrics Module
//!
//! Provides application-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - Active WebSocket sessions and slow-consumer evictions
//! - Hub operations by kind and outcome
//! - Outbox records relayed, by final status
//! - Ingest flushes, flushed entries and acknowledgements
//! - Database pool connections

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Sessions currently indexed by the hub
pub static HUB_SESSIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("hub_sessions_active", "Number of live WebSocket sessions").namespace("chat_core"),
    )
    .expect("Failed to create HUB_SESSIONS_ACTIVE metric")
});

/// Sessions evicted because their outbound queue was full or already closed
pub static HUB_EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("hub_evictions_total", "Sessions evicted during broadcast").namespace("chat_core"),
    )
    .expect("Failed to create HUB_EVICTIONS_TOTAL metric")
});

/// Operation attempts by kind and outcome ("success", "failure", "retry", "rejected")
pub static HUB_OPERATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("hub_operations_total", "Operation attempts handled by the hub")
            .namespace("chat_core"),
        &["kind", "outcome"],
    )
    .expect("Failed to create HUB_OPERATIONS_TOTAL metric")
});

/// Outbox records settled, by status ("processed", "failed")
pub static OUTBOX_RECORDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("outbox_records_total", "Outbox records settled by the relay")
            .namespace("chat_core"),
        &["status"],
    )
    .expect("Failed to create OUTBOX_RECORDS_TOTAL metric")
});

/// Duration of a full relay batch (claim, publish, commit)
pub static OUTBOX_BATCH_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
    HistogramVec::new(
        HistogramOpts::new(
            "outbox_batch_duration_seconds",
            "Outbox relay batch latency in seconds",
        )
        .namespace("chat_core")
        .buckets(buckets),
        &["entity"],
    )
    .expect("Failed to create OUTBOX_BATCH_DURATION_SECONDS metric")
});

/// Batch flushes by outcome ("stored", "abandoned")
pub static INGEST_FLUSHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ingest_flushes_total", "Batch flushes to the message store")
            .namespace("chat_core"),
        &["outcome"],
    )
    .expect("Failed to create INGEST_FLUSHES_TOTAL metric")
});

/// Entries durably written by the batch saver
pub static INGEST_ENTRIES_FLUSHED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("ingest_entries_flushed_total", "Stream entries written to storage")
            .namespace("chat_core"),
    )
    .expect("Failed to create INGEST_ENTRIES_FLUSHED_TOTAL metric")
});

/// Acknowledgements by outcome ("acked", "failed")
pub static INGEST_ACKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ingest_acks_total", "Stream acknowledgements sent").namespace("chat_core"),
        &["outcome"],
    )
    .expect("Failed to create INGEST_ACKS_TOTAL metric")
});

/// Database connection pool stats
pub static DB_POOL_CONNECTIONS: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new("db_pool_connections", "Database connection pool statistics")
            .namespace("chat_core"),
        &["state"], // "idle", "active"
    )
    .expect("Failed to create DB_POOL_CONNECTIONS metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HUB_SESSIONS_ACTIVE.clone()))
        .expect("Failed to register HUB_SESSIONS_ACTIVE");
    registry
        .register(Box::new(HUB_EVICTIONS_TOTAL.clone()))
        .expect("Failed to register HUB_EVICTIONS_TOTAL");
    registry
        .register(Box::new(HUB_OPERATIONS_TOTAL.clone()))
        .expect("Failed to register HUB_OPERATIONS_TOTAL");
    registry
        .register(Box::new(OUTBOX_RECORDS_TOTAL.clone()))
        .expect("Failed to register OUTBOX_RECORDS_TOTAL");
    registry
        .register(Box::new(OUTBOX_BATCH_DURATION_SECONDS.clone()))
        .expect("Failed to register OUTBOX_BATCH_DURATION_SECONDS");
    registry
        .register(Box::new(INGEST_FLUSHES_TOTAL.clone()))
        .expect("Failed to register INGEST_FLUSHES_TOTAL");
    registry
        .register(Box::new(INGEST_ENTRIES_FLUSHED_TOTAL.clone()))
        .expect("Failed to register INGEST_ENTRIES_FLUSHED_TOTAL");
    registry
        .register(Box::new(INGEST_ACKS_TOTAL.clone()))
        .expect("Failed to register INGEST_ACKS_TOTAL");
    registry
        .register(Box::new(DB_POOL_CONNECTIONS.clone()))
        .expect("Failed to register DB_POOL_CONNECTIONS");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn set_active_sessions(count: usize) {
    HUB_SESSIONS_ACTIVE.set(count as i64);
}

pub fn record_eviction() {
    HUB_EVICTIONS_TOTAL.inc();
}

pub fn record_operation(kind: &str, outcome: &str) {
    HUB_OPERATIONS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

/// Helper to record a settled relay batch
pub fn record_outbox_batch(entity: &str, processed: usize, failed: usize, duration_secs: f64) {
    OUTBOX_RECORDS_TOTAL
        .with_label_values(&["processed"])
        .inc_by(processed as u64);
    OUTBOX_RECORDS_TOTAL
        .with_label_values(&["failed"])
        .inc_by(failed as u64);
    OUTBOX_BATCH_DURATION_SECONDS
        .with_label_values(&[entity])
        .observe(duration_secs);
}

pub fn record_flush(outcome: &str, entries: usize) {
    INGEST_FLUSHES_TOTAL.with_label_values(&[outcome]).inc();
    if outcome == "stored" {
        INGEST_ENTRIES_FLUSHED_TOTAL.inc_by(entries as u64);
    }
}

pub fn record_ack(outcome: &str) {
    INGEST_ACKS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Helper to update database pool stats
pub fn update_db_pool_stats(idle: u32, active: u32) {
    DB_POOL_CONNECTIONS
        .with_label_values(&["idle"])
        .set(idle as f64);
    DB_POOL_CONNECTIONS
        .with_label_values(&["active"])
        .set(active as f64);
}
