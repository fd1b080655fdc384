//! Error types for the LabelGrid broker.

use labelgrid_core::BackendError;
use thiserror::Error;

/// Result type alias for broker operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during broker operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("blob not found: {bucket}/{key}")]
    BlobNotFound { bucket: String, key: String },

    #[error("malformed receipt: {0}")]
    InvalidReceipt(String),

    #[error("receipt superseded by a later lease: {0}")]
    StaleReceipt(String),
}

impl From<StateError> for BackendError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::BlobNotFound { bucket, key } => BackendError::NotFound { bucket, key },
            StateError::InvalidReceipt(r) => BackendError::InvalidReceipt(r),
            StateError::StaleReceipt(r) => BackendError::StaleReceipt(r),
            StateError::Open(msg) => BackendError::Unavailable(msg),
            other => BackendError::Storage(other.to_string()),
        }
    }
}
