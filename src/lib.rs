//! # Chat Core Library
//!
//! Real-time chat core with three cooperating parts:
//! - a WebSocket **connection hub** fanning chat events out to subscribed
//!   sessions, evicting any client that cannot keep up
//! - a **transactional outbox relay** publishing recorded messages to a
//!   Redis stream with at-least-once delivery
//! - a **stream ingestion pipeline** persisting stream entries to
//!   PostgreSQL in batches and acknowledging them only once stored
//!
//! ## Architecture
//!
//! - **Domain Layer**: entities, repository traits and ports
//! - **Application Layer**: the send-message use case, outbox relay, ingestion
//! - **Infrastructure Layer**: PostgreSQL, Redis Streams, metrics
//! - **Presentation Layer**: HTTP routes and the WebSocket hub
//!
//! ## Module Structure
//!
//! ```text
//! chat_core/
//! +-- config/         Configuration management
//! +-- domain/         Entities, repository traits, ports
//! +-- application/    Use cases and background workers
//! +-- infrastructure/ Postgres, Redis Streams and metrics adapters
//! +-- presentation/   HTTP routes, middleware, WebSocket hub
//! +-- shared/         Errors and validation helpers
//! ```

// Configuration module
pub mod config;

// Domain layer - Core business logic
pub mod domain;

// Application layer - Use cases and workers
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and lifecycle
pub mod startup;

// Telemetry and observability
pub mod telemetry;
