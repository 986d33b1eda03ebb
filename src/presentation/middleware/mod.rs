//! Middleware
//!
//! Request authentication and CORS.

pub mod auth;
pub mod cors;

pub use auth::{verify_token, AuthUser, Claims};
pub use cors::create_cors_layer;
