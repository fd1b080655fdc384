use labelgrid_core::{BackendError, WireError};
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid task name: {0}")]
    InvalidName(#[from] WireError),

    #[error("task {0} already has a caller waiting on it")]
    DuplicateSubmission(String),

    #[error("no result for task {task_id} within {timeout_secs}s")]
    Timeout { task_id: String, timeout_secs: u64 },

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The registry dropped the completion signal without a result.
    #[error("wait for task {0} was abandoned")]
    Abandoned(String),
}
