//! Export error taxonomy shared by the engine, its collaborators and the protocol adapters.

use thiserror::Error;

/// Errors raised by the event export subsystem.
///
/// Pipeline errors (`StoreUnavailable`, `Serialization`, `DeliveryFailed`) are
/// recorded as the cause of a failed job and surface to clients as `JobFailed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExportError {
    #[error("Event store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Unknown export job: {0}")]
    UnknownJob(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Export job {0} is not finished yet")]
    NotReady(String),

    #[error("Export job {0} was delivered to cloud storage and has no downloadable file")]
    NoLocalArtifact(String),

    #[error("Export job failed: {0}")]
    JobFailed(String),
}

impl ExportError {
    /// Machine-readable error code.
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::StoreUnavailable(_) => "store_unavailable",
            ExportError::Serialization(_) => "serialization_failed",
            ExportError::DeliveryFailed(_) => "delivery_failed",
            ExportError::UnknownJob(_) => "unknown_job",
            ExportError::BadRequest(_) => "bad_request",
            ExportError::NotReady(_) => "not_ready",
            ExportError::NoLocalArtifact(_) => "no_local_artifact",
            ExportError::JobFailed(_) => "job_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct() {
        let errors = [
            ExportError::StoreUnavailable(String::new()),
            ExportError::Serialization(String::new()),
            ExportError::DeliveryFailed(String::new()),
            ExportError::UnknownJob(String::new()),
            ExportError::BadRequest(String::new()),
            ExportError::NotReady(String::new()),
            ExportError::NoLocalArtifact(String::new()),
            ExportError::JobFailed(String::new()),
        ];
        let mut kinds: Vec<_> = errors.iter().map(ExportError::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ExportError::UnknownJob("events_abc".into()).to_string(),
            "Unknown export job: events_abc"
        );
        assert_eq!(
            ExportError::BadRequest("bucket is required".into()).to_string(),
            "bucket is required"
        );
        assert_eq!(
            ExportError::JobFailed("Event store unavailable: timeout".into()).to_string(),
            "Export job failed: Event store unavailable: timeout"
        );
    }
}
