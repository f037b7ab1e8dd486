//! Domain services for the audit event export service.
//!
//! Services define the seams between the export engine and its collaborators.

pub mod cloud_storage;
pub mod csv_export;
pub mod event_log;

pub use cloud_storage::{CloudStorage, CloudStorageError, InMemoryObjectStore};
pub use csv_export::{serialize_events, write_event_stream, CsvEventWriter, CsvSummary, CSV_COLUMNS};
pub use event_log::{EventLogReader, EventLogWriter, EventStream, InMemoryEventLog};
