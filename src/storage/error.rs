//! Storage error taxonomy
//!
//! Information Hiding:
//! - Backend-specific failure causes (Redis errors, I/O errors) are mapped
//!   into a small set of variants callers can match on
//! - The facade's demotion logic keys off `is_unavailable()` alone

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable while establishing a connection
    #[error("connection failed: {0}")]
    Connection(String),

    /// Transient backend failure mid-session (network error, timeout)
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Requested conversation id does not exist
    #[error("conversation not found: {0}")]
    NotFound(String),

    /// A specific persisted record failed schema or parse validation
    #[error("malformed record '{id}': {reason}")]
    MalformedRecord { id: String, reason: String },

    /// Caller supplied invalid input (e.g. empty message content)
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for StoreError {
    /// Mid-session Redis failures are transient by classification; connect
    /// paths map to `Connection` explicitly
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl StoreError {
    /// True for failures the facade recovers from via reconnect/demotion.
    /// `NotFound`, `MalformedRecord` and `Validation` surface to the caller.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Unavailable(_))
    }

    pub fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::MalformedRecord {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Attach the record id to a `MalformedRecord` produced below the level
    /// where the id was known (e.g. envelope parsing).
    pub fn with_record_id(self, id: &str) -> Self {
        match self {
            StoreError::MalformedRecord { reason, .. } => StoreError::MalformedRecord {
                id: id.to_string(),
                reason,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
