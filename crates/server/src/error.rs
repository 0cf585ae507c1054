//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// JSON error envelope returned by every failing endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    /// Human-readable one-line message.
    pub error: String,
    /// Detailed validation messages, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

/// API error type covering the upload protocol's failure taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("invalid upload metadata")]
    Validation { errors: Vec<String> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    FailedPrecondition(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("content validation failed: {0}")]
    InvalidContent(String),

    #[error("{0}")]
    DataLoss(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(hopper_storage::StorageError),

    #[error("session store error: {0}")]
    Metadata(#[from] hopper_metadata::MetadataError),
}

impl From<hopper_storage::StorageError> for ApiError {
    fn from(e: hopper_storage::StorageError) -> Self {
        match e {
            // A missing staged chunk at finalisation time is the protocol's
            // data-loss case, not an internal fault.
            hopper_storage::StorageError::MissingChunk { index } => {
                Self::DataLoss(format!("staged chunk {index} is missing"))
            }
            other => Self::Storage(other),
        }
    }
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Validation { .. } => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::FailedPrecondition(_) => "failed_precondition",
            Self::Integrity { .. } => "integrity_error",
            Self::InvalidContent(_) => "invalid_content",
            Self::DataLoss(_) => "data_loss",
            Self::Internal(_) => "internal_error",
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidArgument(_)
            | Self::Validation { .. }
            | Self::Conflict(_)
            | Self::FailedPrecondition(_)
            | Self::Integrity { .. }
            | Self::InvalidContent(_)
            | Self::DataLoss(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) | Self::Storage(_) | Self::Metadata(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let errors = match &self {
            ApiError::Validation { errors } => Some(errors.clone()),
            _ => None,
        };
        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            errors,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
