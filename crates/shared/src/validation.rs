//! Common validation utilities.

use chrono::{DateTime, Utc};
use validator::ValidationError;

/// Maximum length of an object key or download file name.
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Validates that a time window is well-formed (`from <= to`).
pub fn validate_time_range(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(), ValidationError> {
    if from <= to {
        Ok(())
    } else {
        let mut err = ValidationError::new("time_range");
        err.message = Some("'from' must not be later than 'to'".into());
        Err(err)
    }
}

/// Validates a file name used for downloads and cloud object keys.
///
/// Rejects empty names, path separators, parent references and control characters.
pub fn validate_filename(name: &str) -> Result<(), ValidationError> {
    let invalid = name.is_empty()
        || name.len() > MAX_FILENAME_LENGTH
        || name.contains('/')
        || name.contains('\\')
        || name == "."
        || name == ".."
        || name.chars().any(|c| c.is_control());

    if invalid {
        let mut err = ValidationError::new("filename");
        err.message = Some("Filename must be a plain file name without path separators".into());
        Err(err)
    } else {
        Ok(())
    }
}

/// Validates a cloud bucket name (3-63 chars, lowercase letters, digits, dots and hyphens).
pub fn validate_bucket_name(bucket: &str) -> Result<(), ValidationError> {
    let valid_chars = bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let valid_edges = bucket
        .chars()
        .next()
        .zip(bucket.chars().last())
        .map(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric())
        .unwrap_or(false);

    if (3..=63).contains(&bucket.len()) && valid_chars && valid_edges {
        Ok(())
    } else {
        let mut err = ValidationError::new("bucket");
        err.message = Some("Bucket name must be 3-63 lowercase letters, digits, dots or hyphens".into());
        Err(err)
    }
}
