//! Data Transfer Objects
//!
//! DTOs for operation and API request serialization.

pub mod request;

pub use request::SendMessageRequest;
