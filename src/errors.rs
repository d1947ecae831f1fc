use crate::{models::responses::ErrorResponse, services::bucket::StorageError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

/// Storage operation a failure happened in. Picks the client-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Serve,
    Upload,
    Delete,
    List,
}

impl Operation {
    pub fn failure_message(self) -> &'static str {
        match self {
            Operation::Serve => "Failed to serve file",
            Operation::Upload => "Failed to upload file",
            Operation::Delete => "Failed to delete file",
            Operation::List => "Failed to list files",
        }
    }
}

/// Every error the storage endpoint can answer with.
///
/// Displayed text is exactly what the client sees in `{"error": ...}`; the
/// underlying cause is logged, never sent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Storage is not configured")]
    ConfigurationMissing,
    #[error("File not found")]
    NotFound,
    #[error("{}", .0.failure_message())]
    TransportFailure(Operation),
    #[error("{0}")]
    ValidationFailure(String),
}

impl ApiError {
    /// Log a store failure and map it to its client-facing variant.
    pub fn from_storage(op: Operation, key: &str, err: StorageError) -> Self {
        match err {
            StorageError::InvalidObjectKey => {
                ApiError::ValidationFailure("Invalid object key".into())
            }
            other => {
                error!(operation = ?op, key = %key, error = %other, "storage call failed");
                ApiError::TransportFailure(op)
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ConfigurationMissing | ApiError::TransportFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::ValidationFailure(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (self.status(), body).into_response()
    }
}
