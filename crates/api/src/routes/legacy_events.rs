//! Legacy event export endpoint (`GET /api/events`).
//!
//! Protocol:
//! - first call (no `query_id`) starts an export and answers `201 Created`
//!   if it finished within the short wait, otherwise `202 Accepted`;
//! - calls with `query_id` report progress: `202` while running, `201` once
//!   done, an error carrying the cause if the export failed;
//! - `action=download` with `query_id` returns the CSV body.
//!
//! Cloud destinations are not supported here. They are rejected before any
//! job is created, and tokens of cloud jobs started elsewhere are refused.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use domain::errors::ExportError;
use domain::models::export::CLOUD_EXPORT_UNSUPPORTED_MESSAGE;
use domain::models::{
    Delivery, ExportJobState, JobSnapshot, LegacyAction, LegacyEventsQuery, LegacyExportResponse,
};

use crate::app::AppState;
use crate::error::ApiError;
use crate::routes::exports::artifact_response;

#[axum::debug_handler]
pub async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<LegacyEventsQuery>,
) -> Result<Response, ApiError> {
    if query.to_export_query().targets_cloud() {
        return Err(ExportError::BadRequest(CLOUD_EXPORT_UNSUPPORTED_MESSAGE.to_string()).into());
    }

    match (query.token(), query.action) {
        (Some(token), Some(LegacyAction::Download)) => {
            reject_cloud(&state.engine.poll(token).await?)?;
            let handle = state.engine.retrieve(token).await?;
            artifact_response(handle).await
        }
        (None, Some(LegacyAction::Download)) => Err(ExportError::BadRequest(
            "query_id is required for action=download".to_string(),
        )
        .into()),
        (Some(token), None) => {
            let snapshot = state.engine.poll(token).await?;
            status_response(snapshot)
        }
        (None, None) => {
            let request = query
                .to_export_query()
                .to_request(Utc::now(), state.config.export.default_range_days)?;
            let ticket = state.engine.create_or_attach(request).await;
            let snapshot = state
                .engine
                .wait_for_terminal(&ticket.job_id, state.config.export.legacy_sync_wait())
                .await?;
            status_response(snapshot)
        }
    }
}

fn reject_cloud(snapshot: &JobSnapshot) -> Result<(), ApiError> {
    if matches!(snapshot.delivery, Delivery::CloudUpload { .. }) {
        return Err(ExportError::BadRequest(CLOUD_EXPORT_UNSUPPORTED_MESSAGE.to_string()).into());
    }
    Ok(())
}

fn status_response(snapshot: JobSnapshot) -> Result<Response, ApiError> {
    reject_cloud(&snapshot)?;
    let body = Json(LegacyExportResponse {
        query_id: snapshot.id.clone(),
    });

    match snapshot.state {
        ExportJobState::Pending | ExportJobState::Running => {
            Ok((StatusCode::ACCEPTED, body).into_response())
        }
        ExportJobState::Finished => Ok((StatusCode::CREATED, body).into_response()),
        ExportJobState::Failed => Err(ExportError::JobFailed(
            snapshot
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown cause".to_string()),
        )
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use domain::models::ExportFilter;

    fn snapshot(state: ExportJobState, error: Option<ExportError>) -> JobSnapshot {
        let now = Utc::now();
        JobSnapshot {
            id: "events_abc".to_string(),
            state,
            filter: ExportFilter::new(now - Duration::minutes(3), now).unwrap(),
            delivery: Delivery::Download {
                filename: "events.csv".to_string(),
            },
            created_at: now,
            started_at: None,
            finished_at: None,
            expires_at: None,
            result: None,
            error,
            row_count: None,
        }
    }

    #[test]
    fn test_running_job_is_accepted() {
        let response = status_response(snapshot(ExportJobState::Running, None)).unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let response = status_response(snapshot(ExportJobState::Pending, None)).unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn test_finished_job_is_created() {
        let response = status_response(snapshot(ExportJobState::Finished, None)).unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[test]
    fn test_failed_job_carries_cause() {
        let result = status_response(snapshot(
            ExportJobState::Failed,
            Some(ExportError::StoreUnavailable("connection refused".to_string())),
        ));
        match result {
            Err(ApiError::Export(ExportError::JobFailed(cause))) => {
                assert!(cause.contains("connection refused"))
            }
            _ => panic!("expected a job failure"),
        }
    }

    #[test]
    fn test_cloud_job_is_refused() {
        let mut cloud = snapshot(ExportJobState::Finished, None);
        cloud.delivery = Delivery::CloudUpload {
            bucket: "audit-exports".to_string(),
            key: "events.csv".to_string(),
        };
        match status_response(cloud) {
            Err(ApiError::Export(ExportError::BadRequest(message))) => {
                assert_eq!(message, CLOUD_EXPORT_UNSUPPORTED_MESSAGE)
            }
            _ => panic!("expected the cloud job to be refused"),
        }
    }
}
