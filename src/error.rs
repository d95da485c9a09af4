//! Service error type and its HTTP mapping

use crate::lifecycle::LifecycleError;
use crate::validation::ValidationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Database error: {0}")]
    Infrastructure(#[from] sqlx::Error),

    #[error("File storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Unauthenticated(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("The complaint was changed concurrently. Reload and try again.")]
    Conflict,

    #[error("Too many attempts. Please try again later.")]
    RateLimited,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Lifecycle(LifecycleError::Validation(err))
    }
}

/// Error body, shaped like `ApiResponse` with a machine-readable code
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Lifecycle(LifecycleError::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Lifecycle(LifecycleError::Authorization(_)) | AppError::Forbidden(_) => {
                StatusCode::FORBIDDEN
            }
            AppError::Lifecycle(LifecycleError::InvariantViolation(_)) | AppError::Conflict => {
                StatusCode::CONFLICT
            }
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Infrastructure(_) | AppError::Io(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Lifecycle(LifecycleError::Validation(_)) => "VALIDATION_ERROR",
            AppError::Lifecycle(LifecycleError::Authorization(_)) | AppError::Forbidden(_) => {
                "FORBIDDEN"
            }
            AppError::Lifecycle(LifecycleError::InvariantViolation(_)) => "INVALID_STATE",
            AppError::Conflict => "CONFLICT",
            AppError::Unauthenticated(_) => "UNAUTHENTICATED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::RateLimited => "RATE_LIMITED",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Infrastructure(_) | AppError::Io(_) | AppError::Internal(_) => {
                "INTERNAL_ERROR"
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let field = match &self {
            AppError::Lifecycle(LifecycleError::Validation(e)) => Some(e.field().to_string()),
            _ => None,
        };

        // Storage details stay in the log
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("{}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            success: false,
            error: message,
            code: self.code(),
            field,
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_errors_map_to_http_status() {
        let validation: AppError = ValidationError::required("message").into();
        assert_eq!(validation.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let denied = AppError::from(LifecycleError::Authorization("wrong tier".into()));
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let invariant = AppError::from(LifecycleError::InvariantViolation("terminal".into()));
        assert_eq!(invariant.status(), StatusCode::CONFLICT);
        assert_eq!(invariant.code(), "INVALID_STATE");
    }

    #[test]
    fn test_version_conflict_is_409() {
        assert_eq!(AppError::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(AppError::Conflict.code(), "CONFLICT");
    }

    #[test]
    fn test_service_errors_map_to_http_status() {
        assert_eq!(AppError::Unauthenticated("Not authenticated").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::NotFound("Complaint").status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            AppError::from(sqlx::Error::RowNotFound).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_found_message() {
        assert_eq!(AppError::NotFound("Complaint").to_string(), "Complaint not found");
    }
}
