//! Infrastructure Layer
//!
//! Adapters for external systems:
//! - PostgreSQL pool, transactions and repositories
//! - Redis Streams broker and consumer group
//! - Prometheus metrics

pub mod database;
pub mod metrics;
pub mod repositories;
pub mod streams;
