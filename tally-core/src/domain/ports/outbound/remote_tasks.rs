use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::{
    models::{AuthEvent, Task, TaskId, TaskInput, TaskUpdate},
    RemoteError,
};

/// Outbound port for the authoritative remote task store.
///
/// Implementations own their transport, credentials and timeout policy.
/// Every call may fail; the engine treats failures as "remote is behind"
/// and keeps working on local state.
#[async_trait]
pub trait RemoteTaskService: Send + Sync + 'static {
    /// Whether calls are currently expected to succeed for this session.
    fn is_authenticated(&self) -> bool;

    /// Fetch the full remote task list.
    async fn get_tasks(&self) -> Result<Vec<Task>, RemoteError>;

    /// Create a task. Returns it with its server-issued id.
    async fn create_task(&self, input: &TaskInput) -> Result<Task, RemoteError>;

    /// Apply a partial update to a task.
    async fn update_task(&self, id: &TaskId, update: &TaskUpdate) -> Result<Task, RemoteError>;

    /// Delete a single task. Descendants are deleted by separate calls.
    async fn delete_task(&self, id: &TaskId) -> Result<(), RemoteError>;

    /// Report a closed session's duration. Callers ignore the outcome.
    async fn record_time_summary(&self, id: &TaskId, duration_ms: i64) -> Result<(), RemoteError>;

    /// Stream of sign-in/sign-out transitions, if the service emits them.
    fn subscribe_auth(&self) -> Option<broadcast::Receiver<AuthEvent>> {
        None
    }
}

/// A remote that is never signed in.
///
/// Used when no remote is configured; the engine then runs purely on
/// the local store.
#[async_trait]
impl RemoteTaskService for () {
    fn is_authenticated(&self) -> bool {
        false
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, RemoteError> {
        Err(RemoteError::Unauthorized)
    }

    async fn create_task(&self, _input: &TaskInput) -> Result<Task, RemoteError> {
        Err(RemoteError::Unauthorized)
    }

    async fn update_task(&self, _id: &TaskId, _update: &TaskUpdate) -> Result<Task, RemoteError> {
        Err(RemoteError::Unauthorized)
    }

    async fn delete_task(&self, _id: &TaskId) -> Result<(), RemoteError> {
        Err(RemoteError::Unauthorized)
    }

    async fn record_time_summary(
        &self,
        _id: &TaskId,
        _duration_ms: i64,
    ) -> Result<(), RemoteError> {
        Err(RemoteError::Unauthorized)
    }
}
