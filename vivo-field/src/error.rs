//! Error types for vivo-field

use thiserror::Error;

/// Errors raised while talking to the server or the local store
#[derive(Debug, Error)]
pub enum SyncError {
    /// Server unreachable or request timed out
    #[error("Network error: {0}")]
    Network(String),

    /// Server answered with a non-success status
    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Server response body could not be decoded
    #[error("Malformed server response: {0}")]
    Decode(String),

    /// Local store or validation error
    #[error(transparent)]
    Common(#[from] vivo_common::Error),
}

impl SyncError {
    /// Whether the request may succeed if retried later
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network(_) => true,
            SyncError::Status { status, .. } => *status >= 500,
            SyncError::Decode(_) | SyncError::Common(_) => false,
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Common(vivo_common::Error::Database(err))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Decode(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
