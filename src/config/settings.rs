//! Application settings and configuration structures.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::domain::MESSAGE_ENTITY;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Database configuration (PostgreSQL, holds the outbox and message tables)
    pub database: DatabaseSettings,

    /// Redis configuration (stream broker)
    pub redis: RedisSettings,

    /// JWT verification settings for the WebSocket upgrade
    pub jwt: JwtSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// Connection hub tuning
    pub hub: HubSettings,

    /// Outbox relay tuning
    pub outbox: OutboxSettings,

    /// Stream ingestion tuning
    pub ingest: IngestSettings,

    /// Which roles this process runs
    pub components: ComponentSettings,

    /// Log output format ("pretty" or "json")
    pub log_format: String,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// PostgreSQL database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    pub acquire_timeout: u64,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL
    pub url: String,
}

/// JWT verification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Shared secret used to verify bearer tokens
    pub secret: String,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

/// Connection hub configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HubSettings {
    /// Per-session outbound queue capacity; overflow evicts the session
    pub outbound_queue_capacity: usize,

    /// Capacity of the hub's operation and broadcast intake queues
    pub intake_capacity: usize,

    /// Deadline applied to every inbound operation
    pub operation_timeout_ms: u64,

    /// Retries granted to an operation failing with a transient error
    pub max_retries: u32,

    /// Interval between liveness pings
    pub ping_period_ms: u64,

    /// Maximum silence tolerated from a client before it is dropped
    pub pong_wait_ms: u64,

    /// Deadline for a single socket write
    pub write_wait_ms: u64,

    /// Maximum inbound frame size in bytes
    pub max_message_size: usize,

    /// Upper bound on waiting for session tasks during shutdown
    pub shutdown_timeout_ms: u64,
}

/// Outbox relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OutboxSettings {
    /// Entity kind the relay claims
    pub entity_name: String,

    /// Maximum rows claimed per tick
    pub batch_limit: i64,

    /// Interval between ticks
    pub poll_interval_ms: u64,

    /// Upper bound on a single tick
    pub tick_timeout_ms: u64,

    /// Also run a slower relay over rows previously marked failed
    pub reprocess_failed: bool,
}

/// Stream ingestion configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestSettings {
    /// Stream key chat events are appended to
    pub stream_name: String,

    /// Consumer group name
    pub group_name: String,

    /// Stable consumer name; each process in the group needs its own
    pub consumer_name: String,

    /// Entries claimed per read
    pub claim_count: usize,

    /// Blocking read duration
    pub block_ms: u64,

    /// Flush when this many entries are buffered
    pub batch_size: usize,

    /// Flush at least this often while entries are buffered
    pub flush_interval_ms: u64,

    /// Capacity of the inter-stage queues
    pub queue_capacity: usize,

    /// Upper bound on draining the pipeline at shutdown
    pub ack_wait_timeout_ms: u64,

    /// Approximate stream length cap applied on publish
    pub stream_max_len: usize,
}

/// Role toggles. All roles can run in one process or be split across several.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentSettings {
    pub ws_server: bool,
    pub outbox_processor: bool,
    pub ingest_worker: bool,
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if JWT secret is too short.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("log_format", "pretty")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout", 30)?
            .set_default("cors.allowed_origins", vec!["http://localhost:3000"])?
            // Hub
            .set_default("hub.outbound_queue_capacity", 256_i64)?
            .set_default("hub.intake_capacity", 1024_i64)?
            .set_default("hub.operation_timeout_ms", 5000_i64)?
            .set_default("hub.max_retries", 3_i64)?
            .set_default("hub.ping_period_ms", 9000_i64)?
            .set_default("hub.pong_wait_ms", 10000_i64)?
            .set_default("hub.write_wait_ms", 15000_i64)?
            .set_default("hub.max_message_size", 65536_i64)? // 64KB
            .set_default("hub.shutdown_timeout_ms", 5000_i64)?
            // Outbox
            .set_default("outbox.entity_name", MESSAGE_ENTITY)?
            .set_default("outbox.batch_limit", 10_i64)?
            .set_default("outbox.poll_interval_ms", 1000_i64)?
            .set_default("outbox.tick_timeout_ms", 10000_i64)?
            .set_default("outbox.reprocess_failed", false)?
            // Ingest
            .set_default("ingest.stream_name", "sent-message")?
            .set_default("ingest.group_name", "messages-for-save")?
            .set_default("ingest.consumer_name", "message-saver-0")?
            .set_default("ingest.claim_count", 10_i64)?
            .set_default("ingest.block_ms", 5000_i64)?
            .set_default("ingest.batch_size", 64_i64)?
            .set_default("ingest.flush_interval_ms", 3000_i64)?
            .set_default("ingest.queue_capacity", 1024_i64)?
            .set_default("ingest.ack_wait_timeout_ms", 5000_i64)?
            .set_default("ingest.stream_max_len", 10000_i64)?
            .set_default("components.ws_server", true)?
            .set_default("components.outbox_processor", true)?
            .set_default("components.ingest_worker", true)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // APP__HUB__PING_PERIOD_MS=9000 -> hub.ping_period_ms = 9000
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| settings.validate())
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "JWT secret must be at least {} characters for security. Current length: {}",
                MIN_JWT_SECRET_LENGTH,
                self.jwt.secret.len()
            )));
        }
        if self.hub.outbound_queue_capacity == 0 || self.hub.intake_capacity == 0 {
            return Err(ConfigError::Message(
                "hub queue capacities must be greater than zero".into(),
            ));
        }
        if self.ingest.batch_size == 0 || self.ingest.queue_capacity == 0 {
            return Err(ConfigError::Message(
                "ingest batch size and queue capacity must be greater than zero".into(),
            ));
        }
        Ok(self)
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl HubSettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl IngestSettings {
    pub fn ack_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_wait_timeout_ms)
    }
}
