use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StudioError;

/// Wire envelope for every error the service returns. The `errorId` is a
/// short correlation id echoed in the logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub error_id: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// Handler-level error: a [`StudioError`] plus its HTTP rendering.
#[derive(Debug)]
pub struct ApiError(pub StudioError);

impl<E: Into<StudioError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self.0.code() {
            "VALIDATION_ERROR" | "SECURITY_ERROR" | "INGEST_ERROR" => StatusCode::BAD_REQUEST,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "EXTERNAL_SERVICE_ERROR" => StatusCode::BAD_GATEWAY,
            "TIMEOUT_ERROR" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let status = self.status_code();
        warn!(
            error_id,
            code = self.0.code(),
            status = %status,
            error = %self.0,
            "request failed"
        );
        let body = ErrorBody {
            code: self.0.code().to_string(),
            message: self.0.to_string(),
            error_id,
            retryable: self.0.is_retryable(),
            context: None,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OrchestratorError, SpecError, StorageError};

    #[test]
    fn validation_maps_to_400() {
        let err = ApiError(SpecError::validation("agents", "empty").into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = ApiError(StorageError::not_found("run", "r1").into());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn external_maps_to_502_and_timeouts_to_504() {
        let external = ApiError(StorageError::service("storage", "down").into());
        assert_eq!(external.status_code(), StatusCode::BAD_GATEWAY);
        let timeout = ApiError(
            OrchestratorError::Timeout {
                op: "status",
                deadline: std::time::Duration::from_secs(30),
            }
            .into(),
        );
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn everything_else_maps_to_500() {
        let err = ApiError(crate::error::SystemError::Generic("boom".to_string()).into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
