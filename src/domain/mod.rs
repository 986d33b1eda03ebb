//! # Domain Layer
//!
//! Entities and collaborator contracts of the chat core. Independent of any
//! framework or infrastructure concern.
//!
//! ## Structure
//!
//! - **entities**: chat messages, outbox records, stream entries and their
//!   repository traits
//! - **ports**: the transaction boundary and the broker
//!
//! ## Design Principles
//!
//! - No dependencies on infrastructure or presentation layers
//! - Repository traits define data access contracts
//! - Application services are generic over these traits so they can run
//!   against in-memory fakes

pub mod entities;
pub mod ports;

// Re-export commonly used types
pub use entities::*;
pub use ports::*;
