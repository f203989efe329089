//! API error types with HTTP response mapping.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;

/// API-level error type. Every variant renders as `{"detail": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Saga(#[from] SagaError),

    /// Malformed request body, path or query.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or invalid actor headers.
    #[error("{0}")]
    Unauthorized(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Saga(err) => saga_status(err),
        }
    }
}

fn saga_status(err: &SagaError) -> StatusCode {
    match err {
        SagaError::Validation(_)
        | SagaError::InsufficientStock(_)
        | SagaError::InsufficientFunds(_)
        | SagaError::LimitExceeded(_)
        | SagaError::InvalidTransition(_)
        | SagaError::InvalidState(_)
        | SagaError::AlreadyProcessed(_) => StatusCode::BAD_REQUEST,
        SagaError::NotFound(_) => StatusCode::NOT_FOUND,
        SagaError::Forbidden(_) => StatusCode::FORBIDDEN,
        SagaError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        SagaError::Conflict(_) => StatusCode::CONFLICT,
        SagaError::Dependency(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            ApiError::Saga(SagaError::Dependency(msg)) => {
                tracing::error!(error = %msg, "dependency unavailable");
                "Service temporarily unavailable".to_string()
            }
            other => other.to_string(),
        };
        if status.is_client_error() {
            tracing::debug!(status = status.as_u16(), %detail, "request rejected");
        }
        metrics::counter!("api_errors_total", "status" => status.as_u16().to_string()).increment(1);

        let body = serde_json::json!({ "detail": detail });
        (status, axum::Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
