//! Persistence layer for the audit event export service.
//!
//! This crate contains:
//! - Database connection management
//! - Entity definitions (database row mappings)
//! - The PostgreSQL-backed event log

pub mod db;
pub mod entities;
pub mod repositories;
