//! CSV serialization of audit events.
//!
//! Output is RFC 4180: comma separated, CRLF terminated, fields quoted only
//! when they contain a delimiter, quote or line break. No byte order mark.
//! The header row is always written, even for an empty result.

use chrono::SecondsFormat;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::errors::ExportError;
use crate::models::EventRecord;

/// Column order of exported files.
pub const CSV_COLUMNS: [&str; 17] = [
    "scope",
    "timestamp",
    "user_id",
    "user_name",
    "user_email",
    "project_id",
    "task_id",
    "job_id",
    "payload",
    "org_id",
    "org_slug",
    "obj_name",
    "obj_id",
    "obj_val",
    "source",
    "count",
    "duration",
];

/// Totals reported once a file is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CsvSummary {
    pub rows: u64,
    pub bytes: u64,
}

/// Incremental CSV writer over an async sink.
///
/// Rows are encoded into an in-memory buffer and drained to the sink one at a
/// time, so memory use does not grow with the number of rows.
pub struct CsvEventWriter<W: AsyncWrite + Unpin + Send> {
    sink: W,
    encoder: csv::Writer<Vec<u8>>,
    header_written: bool,
    summary: CsvSummary,
}

impl<W: AsyncWrite + Unpin + Send> CsvEventWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            encoder: new_encoder(),
            header_written: false,
            summary: CsvSummary::default(),
        }
    }

    /// Write the header row. Calling it twice is a no-op.
    pub async fn write_header(&mut self) -> Result<(), ExportError> {
        if self.header_written {
            return Ok(());
        }
        self.encoder
            .write_record(CSV_COLUMNS)
            .map_err(|e| ExportError::Serialization(e.to_string()))?;
        self.drain().await?;
        self.header_written = true;
        Ok(())
    }

    pub async fn write_event(&mut self, event: &EventRecord) -> Result<(), ExportError> {
        self.write_header().await?;
        let row = event_row(event)?;
        self.encoder
            .write_record(&row)
            .map_err(|e| ExportError::Serialization(e.to_string()))?;
        self.drain().await?;
        self.summary.rows += 1;
        Ok(())
    }

    /// Flush the sink and return the totals.
    pub async fn finish(mut self) -> Result<CsvSummary, ExportError> {
        self.write_header().await?;
        self.sink
            .flush()
            .await
            .map_err(|e| ExportError::DeliveryFailed(e.to_string()))?;
        Ok(self.summary)
    }

    async fn drain(&mut self) -> Result<(), ExportError> {
        self.encoder
            .flush()
            .map_err(|e| ExportError::Serialization(e.to_string()))?;
        let chunk = std::mem::replace(&mut self.encoder, new_encoder())
            .into_inner()
            .map_err(|e| ExportError::Serialization(e.to_string()))?;
        self.sink
            .write_all(&chunk)
            .await
            .map_err(|e| ExportError::DeliveryFailed(e.to_string()))?;
        self.summary.bytes += chunk.len() as u64;
        Ok(())
    }
}

/// Serialize a stream of events into `sink`.
///
/// Stops at the first stream error and returns it unchanged.
pub async fn write_event_stream<S, W>(mut events: S, sink: W) -> Result<CsvSummary, ExportError>
where
    S: Stream<Item = Result<EventRecord, ExportError>> + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    let mut writer = CsvEventWriter::new(sink);
    writer.write_header().await?;
    while let Some(event) = events.next().await {
        writer.write_event(&event?).await?;
    }
    writer.finish().await
}

/// Serialize events into an in-memory CSV document.
pub fn serialize_events(events: &[EventRecord]) -> Result<Vec<u8>, ExportError> {
    let mut encoder = new_encoder();
    encoder
        .write_record(CSV_COLUMNS)
        .map_err(|e| ExportError::Serialization(e.to_string()))?;
    for event in events {
        encoder
            .write_record(&event_row(event)?)
            .map_err(|e| ExportError::Serialization(e.to_string()))?;
    }
    encoder
        .into_inner()
        .map_err(|e| ExportError::Serialization(e.to_string()))
}

fn new_encoder() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(Vec::new())
}

fn event_row(event: &EventRecord) -> Result<Vec<String>, ExportError> {
    let payload = serde_json::to_string(&event.payload)
        .map_err(|e| ExportError::Serialization(e.to_string()))?;

    Ok(vec![
        event.scope.clone(),
        event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        int(event.user_id),
        text(&event.user_name),
        text(&event.user_email),
        int(event.project_id),
        int(event.task_id),
        int(event.job_id),
        payload,
        int(event.org_id),
        text(&event.org_slug),
        text(&event.obj_name),
        int(event.obj_id),
        text(&event.obj_val),
        text(&event.source),
        int(event.count),
        int(event.duration),
    ])
}

fn int(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}
