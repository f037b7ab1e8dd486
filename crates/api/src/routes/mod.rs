//! HTTP route handlers.

pub mod events;
pub mod exports;
pub mod health;
pub mod legacy_events;
pub mod requests;
