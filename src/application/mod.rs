//! Application Layer
//!
//! Use cases and background workers. Everything here is generic over the
//! domain traits, so it runs unchanged against Postgres/Redis or the
//! in-memory fakes used by the tests.
//!
//! - **services**: the send-message use case (outbox producer side)
//! - **outbox**: the outbox relay (processor side)
//! - **ingest**: the stream ingestion pipeline
//! - **dto**: request bodies

pub mod dto;
pub mod ingest;
pub mod outbox;
pub mod services;
