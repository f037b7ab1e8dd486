//! Domain models for the audit event export service.

pub mod event;
pub mod export;

pub use event::{EventRecord, IngestEventsRequest, IngestEventsResponse};
pub use export::{
    ArtifactHandle, BackgroundRequest, BackgroundRequestList, Delivery, DeliveryMode,
    ExportAcceptedResponse, ExportFilter, ExportJobState, ExportLocation, ExportQuery,
    ExportRequest, JobResult, JobSnapshot, LegacyAction, LegacyEventsQuery,
    LegacyExportResponse, RequestOperation, RequestStatus,
};
