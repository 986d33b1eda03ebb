//! # Ports
//!
//! Contracts for collaborators that are not repositories: the transaction
//! boundary, the message broker and live fan-out.

mod broker;
mod notifier;
mod transaction;

pub use broker::{Broker, BrokerMessage};
pub use notifier::Notifier;
pub use transaction::UnitOfWork;

#[cfg(test)]
pub use broker::MockBroker;
