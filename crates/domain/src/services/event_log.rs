//! Event log access.
//!
//! The export engine only needs a filtered, time-ordered stream of events.
//! Writers are used by the ingestion endpoint and by test fixtures.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::errors::ExportError;
use crate::models::{EventRecord, ExportFilter};

/// Lazily produced sequence of matching events.
pub type EventStream<'a> = BoxStream<'a, Result<EventRecord, ExportError>>;

/// Read access to the append-only event log.
///
/// Implementations yield events ordered by timestamp ascending. Events that
/// share a timestamp keep insertion order.
pub trait EventLogReader: Send + Sync {
    fn query<'a>(&'a self, filter: &ExportFilter) -> EventStream<'a>;
}

/// Append access to the event log.
#[async_trait]
pub trait EventLogWriter: Send + Sync {
    /// Append events, returning how many were stored.
    async fn append(&self, events: Vec<EventRecord>) -> Result<usize, ExportError>;
}

/// In-process event log used when no database is configured and in tests.
#[derive(Debug)]
pub struct InMemoryEventLog {
    events: RwLock<Vec<EventRecord>>,
    available: AtomicBool,
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn with_events(events: Vec<EventRecord>) -> Self {
        Self {
            events: RwLock::new(events),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: queries fail with `StoreUnavailable` while unset.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push_all(&self, events: Vec<EventRecord>) -> usize {
        let count = events.len();
        self.events
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(events);
        count
    }
}

impl EventLogReader for InMemoryEventLog {
    fn query<'a>(&'a self, filter: &ExportFilter) -> EventStream<'a> {
        if !self.available.load(Ordering::SeqCst) {
            return stream::iter(vec![Err(ExportError::StoreUnavailable(
                "in-memory event log is offline".to_string(),
            ))])
            .boxed();
        }

        let mut matching: Vec<EventRecord> = self
            .events
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        matching.sort_by_key(|event| event.timestamp);

        stream::iter(matching.into_iter().map(Ok)).boxed()
    }
}

#[async_trait]
impl EventLogWriter for InMemoryEventLog {
    async fn append(&self, events: Vec<EventRecord>) -> Result<usize, ExportError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(ExportError::StoreUnavailable(
                "in-memory event log is offline".to_string(),
            ));
        }
        for event in &events {
            event.validate()?;
        }
        Ok(self.push_all(events))
    }
}
