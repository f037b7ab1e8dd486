//! Event routes.
//!
//! `/api/events` serves both the legacy export protocol (GET) and event
//! ingestion from the host system (POST).

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use domain::errors::ExportError;
use domain::models::{IngestEventsRequest, IngestEventsResponse};
use metrics::counter;
use tracing::info;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::routes::{exports, legacy_events};

/// Create events router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(legacy_events::get_events).post(ingest_events))
        .route("/export", post(exports::create_export))
        .route("/download", get(exports::download_export))
}

/// Append a batch of events to the log.
///
/// Events without a correlation id inherit the id of the ingesting request
/// when that id is a UUID.
#[axum::debug_handler]
pub async fn ingest_events(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    Json(body): Json<IngestEventsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.events.is_empty() {
        return Err(ExportError::BadRequest("At least one event is required".to_string()).into());
    }

    let correlation = request_id.and_then(|Extension(id)| id.as_uuid());
    let events = body
        .events
        .into_iter()
        .map(|event| match correlation {
            Some(id) if event.request_id().is_none() => event.with_request_id(id),
            _ => event,
        })
        .collect();

    let accepted = state.event_writer.append(events).await?;
    counter!("audit_events_ingested_total").increment(accepted as u64);
    info!(accepted, "Events ingested");

    Ok((StatusCode::CREATED, Json(IngestEventsResponse { accepted })))
}
