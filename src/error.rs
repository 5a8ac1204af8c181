//! Error Taxonomy
//!
//! NotFound and validation failures are raised before any write. Oracle and
//! persistence failures abort the remaining work but report what was already
//! committed. Notification failures never surface here.

use thiserror::Error;

use crate::domain::AllocationId;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("selected candidates are not in the suggestion list: {}", rejected.join(", "))]
    InvalidSelection { rejected: Vec<String> },

    #[error("matching oracle failed: {0}")]
    Oracle(#[from] OracleError),

    #[error("persistence failed: {message} (already committed: {committed:?})")]
    Persistence {
        message: String,
        committed: Vec<AllocationId>,
    },
}

impl AllocationError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        AllocationError::NotFound { kind, id: id.into() }
    }

    /// Oracle failures are safe to retry; matching has no side effects.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AllocationError::Oracle(_))
    }
}

impl From<StoreError> for AllocationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => AllocationError::NotFound { kind, id },
            StoreError::Conflict(msg) => AllocationError::Validation(msg),
            other => AllocationError::Persistence {
                message: other.to_string(),
                committed: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle call timed out after {0}s")]
    Timeout(u64),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("response failed validation: {0}")]
    InvalidResponse(String),

    #[error("tool loop exceeded {0} iterations without a final answer")]
    IterationLimit(usize),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Uniqueness violation or an illegal state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient failure; the write may or may not have landed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Unavailable(err.to_string())
            }
            rusqlite::Error::SqliteFailure(ref code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(err.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Backend(format!("store task failed: {}", err))
    }
}
