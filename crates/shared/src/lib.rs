//! Shared utilities and common types for the audit export backend.
//!
//! This crate provides common functionality used across all other crates:
//! - Hashing and opaque token generation
//! - Common validation logic

pub mod crypto;
pub mod validation;
