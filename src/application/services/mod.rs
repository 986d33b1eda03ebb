//! Application Services
//!
//! Business logic services that coordinate domain operations.
//!
//! ## Available Services
//!
//! - **MessageService**: send a chat message through the outbox and fan it out

pub mod message_service;

pub use message_service::{MessageError, MessageService, MessageServiceImpl};
