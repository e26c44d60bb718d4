//! HTTP route handlers.

pub mod attach;
pub mod connections;
pub mod health;
