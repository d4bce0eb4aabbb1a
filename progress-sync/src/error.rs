//! Error types for the progress sync engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote call could not complete (connection refused, DNS, reset)
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The backend answered with a non-success status
    #[error("Remote store error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Local cache error: {0}")]
    LocalCache(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// True when the remote side was unreachable rather than answering with an error.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::Timeout(_))
    }

    /// Whether a later attempt (next scheduled tick) may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_) | SyncError::Timeout(_) | SyncError::LocalCache(_) => true,
            SyncError::Remote { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, SyncError::DuplicateKey(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Serialization(err.to_string())
        } else {
            SyncError::Transport(err.to_string())
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transport_classification() {
        assert!(SyncError::Transport("connection refused".into()).is_transport());
        assert!(SyncError::Timeout(Duration::from_secs(10)).is_transport());
        assert!(!SyncError::NotFound("user_progress/a".into()).is_transport());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SyncError::Remote { status: 503, message: "unavailable".into() }.is_retryable());
        assert!(!SyncError::Remote { status: 400, message: "bad".into() }.is_retryable());
        assert!(!SyncError::Validation("balance".into()).is_retryable());
        assert!(!SyncError::DuplicateKey("a".into()).is_retryable());
    }
}
