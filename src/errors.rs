use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("workspace not found")]
    WorkspaceNotFound,

    #[error("metrics store unavailable: {0}")]
    DataUnavailable(String),

    #[error("computation failed: {0}")]
    ComputationFailed(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Classify an error from a metrics-store scan.
    ///
    /// Connectivity-shaped failures become `DataUnavailable` so the refresh
    /// coordinator can retry or fall back to a stale entry; malformed rows
    /// become `ComputationFailed` and are surfaced without retry.
    pub fn from_metrics_scan(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => AppError::DataUnavailable(e.to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. }
            | sqlx::Error::ColumnNotFound(_) => AppError::ComputationFailed(e.to_string()),
            other => AppError::Database(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::InvalidArgument(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_argument",
                reason.clone(),
            ),
            // Deliberately opaque: must not reveal whether the workspace exists.
            AppError::Unauthorized => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "unauthorized",
                "caller is not authorized for this workspace".to_string(),
            ),
            AppError::WorkspaceNotFound => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                "workspace_not_found",
                "workspace not found".to_string(),
            ),
            AppError::DataUnavailable(e) => {
                tracing::warn!("metrics store unavailable: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "availability_error",
                    "data_unavailable",
                    "analytics data is temporarily unavailable".to_string(),
                )
            }
            AppError::ComputationFailed(e) => {
                tracing::error!("aggregate computation failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "computation_failed",
                    "trend computation failed".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        // Tell callers when it is worth retrying.
        if matches!(self, AppError::DataUnavailable(_)) {
            response
                .headers_mut()
                .insert("retry-after", axum::http::HeaderValue::from_static("30"));
        }

        response
    }
}
