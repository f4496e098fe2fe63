//! Task hierarchy and time-tracking engine with local/remote reconciliation.
//!
//! The [`TaskEngine`] owns the working set of tasks. It persists every
//! change to a [`LocalStore`] and mirrors it to a [`RemoteTaskService`]
//! when signed in, merging the two on mount and on auth transitions.

pub mod adapters;
pub mod domain;

pub use domain::{
    hierarchy::TaskFilter,
    models::{
        AuthEvent, Task, TaskId, TaskInput, TaskNode, TaskPatch, TaskSet, TaskStatus, TimeEntry,
        TimeTracking, MAX_SESSION_MS,
    },
    ports::outbound::{Clock, LocalStore, ManualClock, RemoteTaskService, SystemClock},
    services::{EngineState, SyncOutcome, TaskEngine},
    RemoteError, StoreError, TaskError,
};
