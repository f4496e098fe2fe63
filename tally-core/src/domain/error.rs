use thiserror::Error;

use super::models::TaskId;

/// Errors returned by engine operations.
///
/// Only validation failures reject an operation. Remote and storage
/// failures are recorded and logged while the local change stands.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("cannot complete: subtasks incomplete ({} open)", .pending.len())]
    IncompleteSubtasks { id: TaskId, pending: Vec<TaskId> },
    #[error("invalid task: {0}")]
    Invalid(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("session expired, sign in again")]
    StaleAuth,
    #[error("storage error: {0}")]
    Persistence(String),
}

impl TaskError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Whether the operation was rejected without touching any state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::IncompleteSubtasks { .. } | Self::Invalid(_)
        )
    }
}

/// Failures reported by a remote task service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("not signed in")]
    Unauthorized,
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<RemoteError> for TaskError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Unauthorized => TaskError::StaleAuth,
            other => TaskError::Network(other.to_string()),
        }
    }
}

/// Failures reading or writing the local durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Unavailable(String),
}

impl From<StoreError> for TaskError {
    fn from(e: StoreError) -> Self {
        TaskError::Persistence(e.to_string())
    }
}
