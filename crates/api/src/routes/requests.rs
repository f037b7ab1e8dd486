//! Background request status endpoints.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use domain::models::export::EXPORT_OPERATION_TYPE;
use domain::models::{
    BackgroundRequest, BackgroundRequestList, JobResult, JobSnapshot, RequestOperation,
};

use crate::app::AppState;
use crate::error::ApiError;

/// Create background requests router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_requests))
        .route("/:rq_id", get(get_request))
}

/// List live background requests.
#[axum::debug_handler]
pub async fn list_requests(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let results: Vec<BackgroundRequest> = state
        .engine
        .list()
        .await
        .iter()
        .map(background_request)
        .collect();

    Ok(Json(BackgroundRequestList {
        count: results.len(),
        results,
    }))
}

/// Status of one background request.
#[axum::debug_handler]
pub async fn get_request(
    State(state): State<AppState>,
    Path(rq_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.engine.poll(&rq_id).await?;
    Ok(Json(background_request(&snapshot)))
}

/// Render a job snapshot as a background request document.
///
/// Only finished local exports get a `result_url`; cloud exports keep it null.
pub fn background_request(snapshot: &JobSnapshot) -> BackgroundRequest {
    let result_url = match &snapshot.result {
        Some(JobResult::Downloadable(_)) => {
            Some(format!("/api/events/download?rq_id={}", snapshot.id))
        }
        Some(JobResult::DeliveredExternally { .. }) | None => None,
    };

    BackgroundRequest {
        id: snapshot.id.clone(),
        status: snapshot.state.into(),
        message: snapshot
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_default(),
        operation: RequestOperation {
            operation_type: EXPORT_OPERATION_TYPE.to_string(),
            target: "events".to_string(),
            format: "CSV".to_string(),
        },
        created_date: snapshot.created_at,
        started_date: snapshot.started_at,
        finished_date: snapshot.finished_at,
        expiry_date: snapshot.expires_at,
        result_url,
    }
}
