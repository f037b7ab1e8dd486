use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::errors::ExportError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Export(#[from] ExportError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".into(),
                )
            }
            ApiError::Export(err) => {
                let status = match err {
                    ExportError::UnknownJob(_) => StatusCode::NOT_FOUND,
                    ExportError::BadRequest(_) => StatusCode::BAD_REQUEST,
                    ExportError::NotReady(_) | ExportError::NoLocalArtifact(_) => {
                        StatusCode::CONFLICT
                    }
                    ExportError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    ExportError::JobFailed(_)
                    | ExportError::Serialization(_)
                    | ExportError::DeliveryFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::warn!(kind = err.kind(), "Export error: {}", err);
                }
                (status, err.kind(), err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = self.parts();

        let body = ErrorBody {
            error: error_code.into(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_api_error_not_found() {
        let error = ApiError::NotFound("resource not found".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_api_error_internal() {
        let error = ApiError::Internal("database connection failed".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_export_error_statuses() {
        let cases = [
            (ExportError::UnknownJob("x".into()), StatusCode::NOT_FOUND),
            (ExportError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ExportError::NotReady("x".into()), StatusCode::CONFLICT),
            (ExportError::NoLocalArtifact("x".into()), StatusCode::CONFLICT),
            (ExportError::JobFailed("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (ExportError::DeliveryFailed("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (ExportError::Serialization("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (ExportError::StoreUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_job_failed_message_carries_cause() {
        let error = ApiError::from(ExportError::JobFailed(
            "Event store unavailable: connection refused".to_string(),
        ));
        let (_, code, message) = error.parts();
        assert_eq!(code, "job_failed");
        assert!(message.contains("connection refused"));
    }

    #[test]
    fn test_bad_request_message_is_verbatim() {
        let error = ApiError::from(ExportError::BadRequest(
            "This endpoint does not support exporting events to cloud storage".to_string(),
        ));
        let (status, code, message) = error.parts();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "bad_request");
        assert_eq!(
            message,
            "This endpoint does not support exporting events to cloud storage"
        );
    }

    #[test]
    fn test_api_error_display() {
        assert_eq!(
            format!("{}", ApiError::NotFound("test".to_string())),
            "Not found: test"
        );
        assert_eq!(
            format!("{}", ApiError::Export(ExportError::UnknownJob("events_x".into()))),
            "Unknown export job: events_x"
        );
    }
}
