//! Domain types carried over the task and result channels.
//!
//! Both channels carry plain strings. A task message is the payload's
//! storage key; a result message is `"<task_id>:<label>"`, split on the
//! first colon.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// Identifier of a unit of work. Doubles as the payload's storage key.
pub type TaskId = String;

/// Label published when classification fails or a task is given up on.
pub const ERROR_LABEL: &str = "error";

/// Separator between task id and label in a result message.
pub const RESULT_SEPARATOR: char = ':';

/// Longest accepted task id, in bytes.
pub const MAX_TASK_ID_LEN: usize = 255;

// ── Task ──────────────────────────────────────────────────────────

/// A unit of work referencing a stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Blob-store key of the payload.
    pub payload_ref: String,
}

impl Task {
    /// Build a task whose payload is stored under its own id.
    pub fn new(id: impl Into<TaskId>) -> Self {
        let id = id.into();
        Self {
            payload_ref: id.clone(),
            id,
        }
    }

    /// Encode as a task-channel message body.
    pub fn to_message(&self) -> String {
        self.payload_ref.clone()
    }

    /// Decode a task-channel message body.
    ///
    /// The body is the storage key verbatim; surrounding whitespace is part
    /// of the key.
    pub fn from_message(body: &str) -> Result<Self, WireError> {
        validate_task_id(body)?;
        Ok(Self::new(body))
    }
}

// ── Result ────────────────────────────────────────────────────────

/// Classification outcome for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifyResult {
    pub task_id: TaskId,
    pub label: String,
}

impl ClassifyResult {
    pub fn new(task_id: impl Into<TaskId>, label: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            label: label.into(),
        }
    }

    /// A result carrying the error sentinel label.
    pub fn error(task_id: impl Into<TaskId>) -> Self {
        Self::new(task_id, ERROR_LABEL)
    }

    /// Whether this result reports a failed classification.
    pub fn is_error(&self) -> bool {
        self.label == ERROR_LABEL
    }

    /// Encode as a result-channel message body.
    pub fn to_message(&self) -> String {
        self.to_string()
    }

    /// Decode a result-channel message body, splitting on the first colon.
    pub fn parse(body: &str) -> Result<Self, WireError> {
        let (id, label) = body
            .split_once(RESULT_SEPARATOR)
            .ok_or_else(|| WireError::MissingSeparator(body.to_string()))?;
        if id.is_empty() {
            return Err(WireError::EmptyTaskId);
        }
        Ok(Self::new(id, label))
    }
}

impl fmt::Display for ClassifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.task_id, RESULT_SEPARATOR, self.label)
    }
}

/// Check that a task id can be used as a storage key and as the first
/// field of a result message.
pub fn validate_task_id(id: &str) -> Result<(), WireError> {
    if id.is_empty() {
        return Err(WireError::EmptyTaskId);
    }
    if id.len() > MAX_TASK_ID_LEN {
        return Err(WireError::TooLong(id.len()));
    }
    if let Some(c) = id
        .chars()
        .find(|c| *c == RESULT_SEPARATOR || *c == '/' || c.is_control())
    {
        return Err(WireError::ForbiddenChar {
            id: id.to_string(),
            found: c,
        });
    }
    Ok(())
}

/// Milliseconds since the unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
