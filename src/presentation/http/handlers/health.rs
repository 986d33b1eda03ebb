//! Health Check Handlers
//!
//! Kubernetes-style liveness and readiness probes.
//!
//! # Endpoints
//! - `GET /health/live` - Liveness probe (is the process running?)
//! - `GET /health/ready` - Readiness probe (are the backing stores reachable?)

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::time::Instant;

use crate::infrastructure::metrics;
use crate::startup::AppState;

/// Server start time for uptime calculation
static SERVER_START: Lazy<Instant> = Lazy::new(Instant::now);
static SERVER_START_TIME: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);

/// Initialize the server start time (call during startup)
pub fn init_server_start() {
    Lazy::force(&SERVER_START);
    Lazy::force(&SERVER_START_TIME);
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub database: ServiceHealth,
    pub redis: ServiceHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub: Option<HubStatus>,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HubStatus {
    pub closing: bool,
    pub active_sessions: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "alive" })
}

/// Returns 200 when the database is reachable, 503 otherwise.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let database = check_database(&state).await;
    let redis = check_redis(&state).await;
    let hub = state.hub.as_ref().map(|hub| HubStatus {
        closing: hub.is_closing(),
        active_sessions: hub.active_sessions(),
    });

    metrics::update_db_pool_stats(state.db.num_idle() as u32, state.db.size());

    let status = overall_status(&database, &redis);
    let status_code = match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = ReadinessResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: SERVER_START.elapsed().as_secs(),
        started_at: SERVER_START_TIME.to_rfc3339(),
        checks: HealthChecks {
            database,
            redis,
            hub,
        },
    };

    (status_code, Json(response))
}

fn probe<E: std::fmt::Display>(
    result: Result<(), E>,
    started: Instant,
    slow_after_ms: u64,
    what: &str,
) -> ServiceHealth {
    match result {
        Ok(()) => {
            let latency = started.elapsed().as_millis() as u64;
            ServiceHealth {
                status: if latency < slow_after_ms {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded
                },
                latency_ms: Some(latency),
                message: None,
            }
        }
        Err(e) => ServiceHealth {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(format!("{what} connection failed: {e}")),
        },
    }
}

async fn check_database(state: &AppState) -> ServiceHealth {
    let started = Instant::now();
    let result = sqlx::query("SELECT 1").execute(&state.db).await.map(|_| ());
    probe(result, started, 100, "Database")
}

async fn check_redis(state: &AppState) -> ServiceHealth {
    let started = Instant::now();
    let mut conn = state.redis.clone();
    let result = redis::cmd("PING")
        .query_async::<String>(&mut conn)
        .await
        .map(|_| ());
    probe(result, started, 50, "Redis")
}

/// The outbox and ingest paths cannot work without Postgres; a slow or
/// missing Redis only degrades them.
fn overall_status(db: &ServiceHealth, redis: &ServiceHealth) -> HealthStatus {
    if db.status == HealthStatus::Unhealthy {
        return HealthStatus::Unhealthy;
    }
    if db.status == HealthStatus::Degraded || redis.status != HealthStatus::Healthy {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}
