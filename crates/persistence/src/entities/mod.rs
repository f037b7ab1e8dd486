//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod audit_event;

pub use audit_event::AuditEventEntity;
