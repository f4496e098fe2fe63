//! Local durable store port.
//!
//! Holds three independent values: the task list, the expanded tree
//! nodes, and the running-timer markers (`task id -> started at`, epoch
//! ms) that let a restart recover a session that was still ticking.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{
    models::{Task, TaskId},
    StoreError,
};

pub type RunningTimers = BTreeMap<TaskId, i64>;
pub type ExpandedNodes = BTreeSet<TaskId>;

/// Outbound port for the local key-value cache.
///
/// `load_*` returns `Ok(None)` when nothing has been stored yet.
pub trait LocalStore: Send + Sync + 'static {
    fn load_tasks(&self) -> Result<Option<Vec<Task>>, StoreError>;

    fn save_tasks(&self, tasks: &[Task]) -> Result<(), StoreError>;

    fn load_expanded(&self) -> Result<Option<ExpandedNodes>, StoreError>;

    fn save_expanded(&self, expanded: &ExpandedNodes) -> Result<(), StoreError>;

    fn load_running_timers(&self) -> Result<Option<RunningTimers>, StoreError>;

    fn save_running_timers(&self, timers: &RunningTimers) -> Result<(), StoreError>;
}
