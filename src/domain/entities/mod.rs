//! # Domain Entities
//!
//! Core domain entities of the chat core.
//!
//! - **ChatMessage / MessageEvent**: a message as sent by a client, and the
//!   serialized snapshot that travels through the outbox and the broker
//! - **OutboxRecord**: a pending publication written in the same transaction
//!   as the domain write it shadows
//! - **StreamEntry**: a chat event claimed from the durable stream
//!
//! ## Repository Traits
//!
//! Each entity has an associated repository trait defining data access operations.
//! These traits are implemented in the infrastructure layer, following the
//! dependency inversion principle.

mod message;
mod outbox;
mod stream_entry;

pub use message::{ChatMessage, MessageEvent, MessageRepository, MESSAGE_ENTITY, SENT_MESSAGE_EVENT};
pub use outbox::{ClaimFilter, OutboxRecord, OutboxRepository, OutboxStatus};
pub use stream_entry::{
    event_fields, ConsumerGroup, MessageStream, StreamEntry, StreamEntryError, StreamRecord,
    FIELD_CHAT_ID, FIELD_CONTENT, FIELD_EVENT, FIELD_TIMESTAMP, FIELD_USER_ID,
};
