//! Presentation Layer
//!
//! HTTP routes and the WebSocket connection hub.

pub mod http;
pub mod middleware;
pub mod websocket;
