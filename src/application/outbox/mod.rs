//! Transactional Outbox
//!
//! The producer side lives with the domain write (see
//! [`MessageService`](crate::application::services::MessageService)). This
//! module is the processor side: a periodic relay that claims pending rows,
//! publishes them to the broker and records the outcome.
//!
//! Claims use row-level lock-skip reads, so several relay instances can run
//! against the same table without publishing a row twice in one pass.

mod processor;
mod relay;

pub use processor::{BatchReport, OutboxProcessor, RecordFailure, RelayError};
pub use relay::{OutboxRelay, RelayConfig, RelayHandle};
