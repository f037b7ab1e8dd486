//! Domain layer for the audit event export service.
//!
//! This crate contains:
//! - Domain models (EventRecord, ExportFilter, export job states)
//! - Event log, cloud storage and CSV serialization services
//! - The export error taxonomy

pub mod errors;
pub mod models;
pub mod services;
