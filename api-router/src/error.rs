use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde_json::json;
use thiserror::Error;

/// Failures the HTTP surface reports to clients. Streaming-turn failures
/// (quota denial, deadlines, model errors) travel as terminal SSE `error`
/// events instead; this type covers the request/response endpoints and the
/// setup phase of a stream. The `Internal` variant deliberately carries no
/// payload — causes are logged where the error is mapped, never serialized.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("authentication required: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("a backing service did not answer in time")]
    UpstreamTimeout,
    #[error("internal error")]
    Internal,
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable slug, so clients don't parse Korean or
    /// English prose to branch on failures.
    const fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::UpstreamTimeout => "upstream_timeout",
            Self::Internal => "internal",
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::BadRequest(msg),
            AppError::Auth(msg) => Self::Unauthorized(msg),
            AppError::Timeout(msg) => {
                tracing::warn!(%msg, "Upstream deadline exceeded");
                Self::UpstreamTimeout
            }
            other => {
                tracing::error!(error = ?other, "Internal error surfaced to the API layer");
                Self::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "error",
            "code": self.code(),
            "message": self.to_string(),
        });

        (self.status(), Json(body)).into_response()
    }
}
