//! HTTP Handlers
//!
//! Request handlers for all HTTP endpoints.

pub mod hub;
pub mod health;
