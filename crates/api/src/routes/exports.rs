//! Background export endpoints.
//!
//! `POST /api/events/export` starts (or joins) an export and always answers
//! `202 Accepted` with the request id. Progress is read from
//! `/api/requests/:rq_id`; finished local exports are fetched from
//! `/api/events/download`.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use domain::models::{ArtifactHandle, ExportAcceptedResponse, ExportQuery};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::app::AppState;
use crate::error::ApiError;

/// Query of the download endpoint.
#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub rq_id: String,
}

/// Start an export, or attach to an identical one already running.
#[axum::debug_handler]
pub async fn create_export(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let request = query.to_request(Utc::now(), state.config.export.default_range_days)?;
    let ticket = state.engine.create_or_attach(request).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(ExportAcceptedResponse {
            rq_id: ticket.job_id,
        }),
    ))
}

/// Stream the CSV of a finished local export.
#[axum::debug_handler]
pub async fn download_export(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let handle = state.engine.retrieve(&query.rq_id).await?;
    artifact_response(handle).await
}

/// Build a streamed `text/csv` attachment response for a finished file.
pub(crate) async fn artifact_response(handle: ArtifactHandle) -> Result<Response, ApiError> {
    let file = tokio::fs::File::open(&handle.path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::NotFound("Export file is no longer available".to_string())
        } else {
            ApiError::Internal(format!("cannot open export file: {}", e))
        }
    })?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        handle.filename.replace('"', "")
    );
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
