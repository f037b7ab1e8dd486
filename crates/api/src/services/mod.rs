//! Export engine and its delivery collaborators.

pub mod delivery;
pub mod export_engine;
pub mod object_storage;

pub use delivery::DeliveryBackend;
pub use export_engine::{EngineSettings, EngineStats, ExportEngine, JobTicket, SweepReport};
pub use object_storage::HttpObjectStore;
