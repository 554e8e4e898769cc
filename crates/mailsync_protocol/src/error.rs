//! Error types for protocol handling.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while interpreting remote data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A body was not the JSON we expected.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A field held an unusable value.
    #[error("invalid field {field}: {message}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What was wrong.
        message: String,
    },
}

impl ProtocolError {
    /// Creates an invalid field error.
    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            message: message.into(),
        }
    }
}
