//! Repository implementations for database operations.

pub mod audit_event;

pub use audit_event::AuditEventRepository;
