//! Error types and handling
//!
//! Common error types used across the application, plus their mapping onto
//! HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::library::LibraryError;
use crate::pipeline::PipelineError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response for API clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::Pipeline(_) => "PIPELINE_ERROR",
            AppError::Library(LibraryError::NotFound(_)) => "NOT_FOUND",
            AppError::Library(LibraryError::InvalidName(_)) => "INVALID_NAME",
            AppError::Library(LibraryError::Conflict(_)) => "CONFLICT",
            AppError::Library(LibraryError::Io(_)) => "IO_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Library(LibraryError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Library(LibraryError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            AppError::Library(LibraryError::Conflict(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorResponse::from(self))).into_response()
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_errors_map_to_client_status_codes() {
        let not_found = AppError::from(LibraryError::NotFound("x.mp4".into()));
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.code(), "NOT_FOUND");

        let invalid = AppError::from(LibraryError::InvalidName("x.avi".into()));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let conflict = AppError::from(LibraryError::Conflict("x.mp4".into()));
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn pipeline_errors_are_server_errors() {
        let err = AppError::from(PipelineError::Spawn("no such binary".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "PIPELINE_ERROR");
    }
}
