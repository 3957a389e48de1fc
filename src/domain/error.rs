// src/domain/error.rs
// Domain error taxonomy shared by the orchestrator, dataset service, and rate limiter.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("a generation is already in progress for this conversation")]
    Conflict,

    #[error("token rate limit exceeded")]
    RateLimit { resets_in_seconds: i64 },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    Internal {
        message: String,
        details: Option<String>,
    },
}

impl DomainError {
    pub fn internal(err: impl std::fmt::Display, kind: &str) -> Self {
        DomainError::Internal {
            message: err.to_string(),
            details: Some(kind.to_string()),
        }
    }
}

/// HTTP mapping for the out-of-scope REST routers. The push channel maps the
/// same taxonomy to wire events instead of status codes; see `push::message`.
impl IntoResponse for DomainError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            DomainError::Conflict => (StatusCode::CONFLICT, self.to_string(), None),
            DomainError::RateLimit { resets_in_seconds } => (
                StatusCode::TOO_MANY_REQUESTS,
                self.to_string(),
                Some(format!("resets_in_seconds={}", resets_in_seconds)),
            ),
            DomainError::NotFound(ref msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            DomainError::Forbidden(ref msg) => (StatusCode::FORBIDDEN, msg.clone(), None),
            DomainError::Validation(ref msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            DomainError::Internal {
                ref message,
                ref details,
            } => (StatusCode::INTERNAL_SERVER_ERROR, message.clone(), details.clone()),
        };

        tracing::error!(%error, ?details, "request failed");

        (
            status,
            Json(serde_json::json!({ "error": error, "details": details })),
        )
            .into_response()
    }
}

pub type DomainResult<T> = Result<T, DomainError>;
