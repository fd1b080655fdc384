//! Error types shared by every collaborator implementation.

use thiserror::Error;

/// Result type alias for blob store and message queue operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Failures reported by an external collaborator (blob store, queue).
///
/// All variants are transient from the pipeline's point of view: the
/// loop that hit them logs, backs off, and tries again.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("unknown receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("lease expired for receipt: {0}")]
    StaleReceipt(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Errors decoding or validating channel messages and identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("result message has no ':' separator: {0:?}")]
    MissingSeparator(String),

    #[error("task id is empty")]
    EmptyTaskId,

    #[error("task id is {0} bytes long")]
    TooLong(usize),

    #[error("task id {id:?} contains forbidden character {found:?}")]
    ForbiddenChar { id: String, found: char },
}
