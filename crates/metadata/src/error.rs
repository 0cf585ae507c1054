//! Session store error types.

use thiserror::Error;

/// Session store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Config(e.to_string())
    }
}

/// Result type for session store operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
