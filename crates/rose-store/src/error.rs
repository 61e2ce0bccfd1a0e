use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unknown or expired session id. Callers treat this as an invalid
    /// session, not a failure of the store.
    #[error("session not found: {0}")]
    NotFound(String),

    /// The backend could not be reached (refused, dropped, timed out).
    #[error("state backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered, but with an error reply.
    #[error("state backend error: {0}")]
    Backend(String),

    #[error("corrupt record at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("gave up updating {key} after {attempts} conflicting writes")]
    Conflict { key: String, attempts: u32 },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Backend(e.to_string())
        }
    }
}
