use thiserror::Error;

use rose_store::StoreError;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Unknown, expired, stopped or unreadable session. The client should
    /// start a new session.
    #[error("session not found or expired: {0}")]
    SessionNotFound(String),

    #[error("state backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => SessionError::SessionNotFound(id),
            StoreError::Unavailable(msg) => SessionError::BackendUnavailable(msg),
            other => SessionError::Store(other),
        }
    }
}
