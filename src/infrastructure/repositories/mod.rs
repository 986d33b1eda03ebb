//! Repository Implementations
//!
//! PostgreSQL implementations of domain repository traits.
//!
//! ## Available Repositories
//!
//! - **PgOutboxRepository** - outbox insert, lock-skip claim, status update
//! - **PgMessageRepository** - idempotent batch insert of ingested messages

mod message_repository;
mod outbox_repository;

pub use message_repository::PgMessageRepository;
pub use outbox_repository::PgOutboxRepository;
