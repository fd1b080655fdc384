use std::path::PathBuf;

use labelgrid_core::BackendError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Infrastructure failures while processing a task. The task stays
/// unacknowledged and the queue redelivers it.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to receive task: {0}")]
    Receive(#[source] BackendError),

    #[error("failed to download payload for {task_id}: {source}")]
    Download {
        task_id: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to upload result for {task_id}: {source}")]
    Upload {
        task_id: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to publish result for {task_id}: {source}")]
    Publish {
        task_id: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to ack task {task_id}: {source}")]
    Ack {
        task_id: String,
        #[source]
        source: BackendError,
    },
}

/// Classification failures. Terminal for the task: answered with the
/// error label.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("payload is empty")]
    EmptyPayload,

    #[error("gallery has no reference images")]
    EmptyGallery,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("classifier task failed: {0}")]
    Internal(String),
}
