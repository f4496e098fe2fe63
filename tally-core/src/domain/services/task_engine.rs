use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

use tokio::{
    sync::{Mutex as AsyncMutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::domain::{
    hierarchy::{build_tree, filtered_forest, subtree_ids, TaskFilter},
    models::{Task, TaskId, TaskInput, TaskNode, TaskPatch, TaskSet, TaskStatus, TaskUpdate},
    ports::outbound::{Clock, ExpandedNodes, LocalStore, RemoteTaskService, RunningTimers},
    status_gate::check_transition,
    RemoteError, TaskError,
};

/// Everything the engine holds in memory.
///
/// Never mutated in place: every operation edits a clone and swaps it in,
/// so a reader holding an `Arc<EngineState>` always sees a whole state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineState {
    pub tasks: TaskSet,
    pub expanded: ExpandedNodes,
    /// Derived from the active sessions in `tasks` on every commit.
    pub running: RunningTimers,
}

/// Running-timer markers for every active session in `tasks`.
pub(crate) fn running_markers(tasks: &TaskSet) -> RunningTimers {
    tasks
        .iter()
        .filter(|task| task.time_tracking.is_active)
        .filter_map(|task| Some((task.id.clone(), task.time_tracking.last_started?)))
        .collect()
}

/// Set `status` on `task`, closing an open session first when the task
/// leaves `InProgress` for `Done` or `Open`.
///
/// Status and time tracking change together so the session is closed
/// exactly once per transition. Returns the credited duration, if any.
fn apply_status(task: &mut Task, status: TaskStatus, now: i64) -> Option<i64> {
    let closed = match status {
        TaskStatus::Done | TaskStatus::Open => task.time_tracking.close(now),
        TaskStatus::InProgress => None,
    };
    task.status = status;
    closed
}

fn write_state<S: LocalStore>(store: &S, state: &EngineState) {
    if let Err(e) = store.save_tasks(&state.tasks.to_vec()) {
        warn!(error = %e, "Failed to persist tasks");
    }
    if let Err(e) = store.save_expanded(&state.expanded) {
        warn!(error = %e, "Failed to persist expanded nodes");
    }
    if let Err(e) = store.save_running_timers(&state.running) {
        warn!(error = %e, "Failed to persist running timers");
    }
}

/// The task hierarchy and time-tracking engine.
///
/// Cheap to clone; clones share state. Every mutating operation applies
/// to memory first, persists once to the local store, then attempts the
/// matching remote call when signed in. Remote failures never undo the
/// local change: they are logged and surfaced through [`last_error`].
///
/// [`last_error`]: TaskEngine::last_error
pub struct TaskEngine<R, S> {
    pub(super) remote: Arc<R>,
    pub(super) store: Arc<S>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) state: Arc<RwLock<Arc<EngineState>>>,
    /// Bumped under the state write lock on every swap.
    generation: Arc<AtomicU64>,
    /// Generation of the last state written to the store.
    persisted: Arc<AsyncMutex<u64>>,
    last_error: Arc<Mutex<Option<String>>>,
    pub(super) listener: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<R, S> Clone for TaskEngine<R, S> {
    fn clone(&self) -> Self {
        Self {
            remote: self.remote.clone(),
            store: self.store.clone(),
            clock: self.clock.clone(),
            state: self.state.clone(),
            generation: self.generation.clone(),
            persisted: self.persisted.clone(),
            last_error: self.last_error.clone(),
            listener: self.listener.clone(),
        }
    }
}

impl<R: RemoteTaskService, S: LocalStore> TaskEngine<R, S> {
    pub fn new(remote: Arc<R>, store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            remote,
            store,
            clock,
            state: Arc::new(RwLock::new(Arc::new(EngineState::default()))),
            generation: Arc::new(AtomicU64::new(0)),
            persisted: Arc::new(AsyncMutex::new(0)),
            last_error: Arc::new(Mutex::new(None)),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    // ========================================================================
    // Readers
    // ========================================================================

    /// The current state. Cheap; never blocks writers for long.
    pub async fn snapshot(&self) -> Arc<EngineState> {
        self.state.read().await.clone()
    }

    pub async fn tasks(&self) -> TaskSet {
        self.snapshot().await.tasks.clone()
    }

    pub async fn task(&self, id: &TaskId) -> Option<Task> {
        self.snapshot().await.tasks.get(id).cloned()
    }

    pub async fn tree(&self) -> Vec<TaskNode> {
        build_tree(&self.snapshot().await.tasks)
    }

    /// Matching tasks with their full ancestor path.
    pub async fn filtered_tree(&self, filter: &TaskFilter) -> Vec<TaskNode> {
        let snapshot = self.snapshot().await;
        if filter.is_empty() {
            return build_tree(&snapshot.tasks);
        }
        filtered_forest(&snapshot.tasks, |task| filter.matches(task))
    }

    pub async fn expanded(&self) -> ExpandedNodes {
        self.snapshot().await.expanded.clone()
    }

    /// Committed total plus the live part of an open session, in ms.
    ///
    /// Read-only: calling this on every tick never changes committed time.
    pub async fn elapsed(&self, id: &TaskId) -> Option<i64> {
        let now = self.clock.now_ms();
        self.snapshot()
            .await
            .tasks
            .get(id)
            .map(|task| task.time_tracking.elapsed(now))
    }

    /// The most recent network or sync failure, for display.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Take and clear the most recent failure.
    pub fn take_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(super) fn set_error(&self, message: impl Into<String>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }

    // ========================================================================
    // State plumbing
    // ========================================================================

    /// Apply `f` to a copy of the state and swap it in.
    ///
    /// If `f` fails nothing changes. If it leaves the state untouched,
    /// nothing is persisted. Overlapping commits reach the store in swap
    /// order; a state superseded before its write starts is skipped.
    pub(super) async fn commit<T, F>(&self, f: F) -> Result<T, TaskError>
    where
        F: FnOnce(&mut EngineState) -> Result<T, TaskError>,
    {
        let mut guard = self.state.write().await;
        let mut next = EngineState::clone(&guard);
        let out = f(&mut next)?;
        next.running = running_markers(&next.tasks);

        if next != **guard {
            let next = Arc::new(next);
            *guard = next.clone();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            drop(guard);
            self.persist(generation, next).await;
        }
        Ok(out)
    }

    /// Write the state to the local store off the async workers.
    ///
    /// Failures are logged only.
    async fn persist(&self, generation: u64, state: Arc<EngineState>) {
        let mut persisted = self.persisted.lock().await;
        if generation <= *persisted {
            debug!(generation, "Skipping superseded state write");
            return;
        }

        let store = self.store.clone();
        let written =
            tokio::task::spawn_blocking(move || write_state(store.as_ref(), &state)).await;
        if let Err(e) = written {
            warn!(error = %e, "State write task failed");
        }
        *persisted = generation;
    }

    /// Whether a remote call for `id` makes sense right now.
    fn remote_knows(&self, id: &TaskId) -> bool {
        id.is_server_issued() && self.remote.is_authenticated()
    }

    pub(super) fn remote_failed(&self, operation: &str, id: Option<&TaskId>, e: RemoteError) {
        let err = TaskError::from(e);
        warn!(
            operation,
            task_id = id.map(|id| id.as_str()).unwrap_or("-"),
            error = %err,
            "Remote call failed, continuing on local state"
        );
        self.set_error(err.to_string());
    }

    async fn push_update(&self, id: &TaskId, update: TaskUpdate) {
        if !self.remote_knows(id) {
            return;
        }
        if let Err(e) = self.remote.update_task(id, &update).await {
            self.remote_failed("update task", Some(id), e);
        }
    }

    async fn push_time_summary(&self, id: &TaskId, duration_ms: i64) {
        if !self.remote_knows(id) {
            return;
        }
        if let Err(e) = self.remote.record_time_summary(id, duration_ms).await {
            debug!(task_id = %id, error = %e, "Time summary not recorded");
        }
    }

    // ========================================================================
    // Task lifecycle
    // ========================================================================

    /// Create a task under an optional parent.
    ///
    /// The task is created locally with a local id. When signed in and the
    /// parent is known to the remote, the remote create is attempted and
    /// the server id replaces the local one. Returns the task's final id.
    pub async fn create_task(&self, input: TaskInput) -> Result<TaskId, TaskError> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(TaskError::invalid("title must not be empty"));
        }

        let id = TaskId::generate_local();
        let created_at = self.clock.now();

        self.commit(|state| {
            let depth = match &input.parent_id {
                Some(parent_id) => {
                    let parent = state
                        .tasks
                        .get_mut(parent_id)
                        .ok_or_else(|| TaskError::NotFound(parent_id.clone()))?;
                    parent.child_ids.push(id.clone());
                    parent.depth + 1
                }
                None => 0,
            };

            let mut task = Task::new(id.clone(), title.clone(), created_at)
                .with_description(input.description.clone())
                .with_status(input.status);
            task.due_date = input.due_date;
            task.parent_id = input.parent_id.clone();
            task.depth = depth;
            state.tasks.insert(task);
            Ok(())
        })
        .await?;

        info!(task_id = %id, parent_id = ?input.parent_id, "Created task");

        let parent_on_remote = input.parent_id.as_ref().map_or(true, TaskId::is_server_issued);
        if !self.remote.is_authenticated() || !parent_on_remote {
            return Ok(id);
        }

        let input = TaskInput { title, ..input };
        match self.remote.create_task(&input).await {
            Ok(created) => Ok(self.adopt_server_id(&id, created.id).await.unwrap_or(id)),
            Err(e) => {
                self.remote_failed("create task", Some(&id), e);
                Ok(id)
            }
        }
    }

    /// Replace a local id with the id the server issued for it.
    ///
    /// A response for a task deleted in the meantime is ignored. Returns
    /// the new id when the swap happened.
    pub(super) async fn adopt_server_id(&self, local: &TaskId, server: TaskId) -> Option<TaskId> {
        let swapped = self
            .commit(|state| {
                if !state.tasks.contains(local) {
                    return Ok(false);
                }
                if state.tasks.contains(&server) {
                    warn!(
                        local_id = %local,
                        server_id = %server,
                        "Server id already present, keeping local id"
                    );
                    return Ok(false);
                }

                state.tasks.rename(local, server.clone());
                for task in state.tasks.iter_mut() {
                    if task.parent_id.as_ref() == Some(local) {
                        task.parent_id = Some(server.clone());
                    }
                    for child in task.child_ids.iter_mut().filter(|child| *child == local) {
                        *child = server.clone();
                    }
                }
                if state.expanded.remove(local) {
                    state.expanded.insert(server.clone());
                }
                Ok(true)
            })
            .await
            .unwrap_or(false);

        if swapped {
            debug!(local_id = %local, server_id = %server, "Adopted server id");
            Some(server)
        } else {
            debug!(local_id = %local, "Dropped stale create response");
            None
        }
    }

    /// Edit a task. A status in the patch is gated and applied exactly as
    /// [`move_task`](Self::move_task) would.
    pub async fn update_task(&self, id: &TaskId, patch: TaskPatch) -> Result<(), TaskError> {
        if patch.title.as_deref().is_some_and(|title| title.trim().is_empty()) {
            return Err(TaskError::invalid("title must not be empty"));
        }

        let now = self.clock.now_ms();
        let (task, closed) = self
            .commit(|state| {
                let current = state
                    .tasks
                    .get(id)
                    .ok_or_else(|| TaskError::NotFound(id.clone()))?;
                if let Some(status) = patch.status {
                    check_transition(current, status, &state.tasks)?;
                }

                let mut next = current.clone();
                if let Some(title) = &patch.title {
                    next.title = title.trim().to_string();
                }
                if let Some(description) = &patch.description {
                    next.description = description.clone();
                }
                if let Some(due_date) = patch.due_date {
                    next.due_date = due_date;
                }
                let closed = patch
                    .status
                    .and_then(|status| apply_status(&mut next, status, now));

                state.tasks.insert(next.clone());
                Ok((next, closed))
            })
            .await?;

        info!(task_id = %id, status = %task.status, closed_ms = ?closed, "Updated task");

        let update = TaskUpdate {
            title: patch.title.map(|_| task.title.clone()),
            description: patch.description,
            due_date: patch.due_date,
            status: patch.status,
            time_tracking: patch.status.map(|_| task.time_tracking.clone()),
        };
        self.push_update(id, update).await;
        if let Some(duration) = closed {
            self.push_time_summary(id, duration).await;
        }
        Ok(())
    }

    /// Move a task to `status`.
    ///
    /// Moving to `Done` is rejected while any child is not done. Leaving
    /// `InProgress` for `Done` or `Open` closes a running session in the
    /// same update that changes the status.
    pub async fn move_task(&self, id: &TaskId, status: TaskStatus) -> Result<(), TaskError> {
        self.update_task(id, TaskPatch::status(status)).await
    }

    /// Delete a task and, depth-first, every descendant.
    ///
    /// Locally the cascade always completes. Remote deletes are attempted
    /// per id, children before parents; one failure does not stop the rest.
    pub async fn delete_task(&self, id: &TaskId) -> Result<Vec<TaskId>, TaskError> {
        let removed = self
            .commit(|state| {
                let task = state
                    .tasks
                    .get(id)
                    .ok_or_else(|| TaskError::NotFound(id.clone()))?;
                let parent_id = task.parent_id.clone();
                let removed = subtree_ids(id, &state.tasks);

                if let Some(parent_id) = parent_id {
                    if let Some(parent) = state.tasks.get_mut(&parent_id) {
                        parent.child_ids.retain(|child| child != id);
                    }
                }
                for removed_id in &removed {
                    state.tasks.remove(removed_id);
                    state.expanded.remove(removed_id);
                }
                for task in state.tasks.iter_mut() {
                    task.child_ids.retain(|child| !removed.contains(child));
                }
                Ok(removed)
            })
            .await?;

        info!(task_id = %id, count = removed.len(), "Deleted task subtree");

        if self.remote.is_authenticated() {
            for removed_id in removed.iter().rev().filter(|id| id.is_server_issued()) {
                if let Err(e) = self.remote.delete_task(removed_id).await {
                    self.remote_failed("delete task", Some(removed_id), e);
                }
            }
        }
        Ok(removed)
    }

    /// Expand or collapse a node in the tree view. Returns the new state.
    pub async fn toggle_expanded(&self, id: &TaskId) -> Result<bool, TaskError> {
        self.commit(|state| {
            if !state.tasks.contains(id) {
                return Err(TaskError::NotFound(id.clone()));
            }
            if state.expanded.remove(id) {
                Ok(false)
            } else {
                state.expanded.insert(id.clone());
                Ok(true)
            }
        })
        .await
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Start the task's timer, moving it to `InProgress` if needed.
    ///
    /// Idempotent: a second call while running changes nothing.
    pub async fn start_timer(&self, id: &TaskId) -> Result<(), TaskError> {
        let now = self.clock.now_ms();
        let (task, started) = self
            .commit(|state| {
                let task = state
                    .tasks
                    .get_mut(id)
                    .ok_or_else(|| TaskError::NotFound(id.clone()))?;
                let moved = task.status != TaskStatus::InProgress;
                task.status = TaskStatus::InProgress;
                let started = task.time_tracking.start(now);
                Ok((task.clone(), moved || started))
            })
            .await?;

        if !started {
            debug!(task_id = %id, "Timer already running");
            return Ok(());
        }

        info!(task_id = %id, started_at = now, "Started timer");
        self.push_update(id, TaskUpdate::timer(&task)).await;
        Ok(())
    }

    /// Pause the task's timer. Returns the credited duration, or `None`
    /// when no session was running.
    pub async fn pause_timer(&self, id: &TaskId) -> Result<Option<i64>, TaskError> {
        let now = self.clock.now_ms();
        let (task, closed) = self
            .commit(|state| {
                let task = state
                    .tasks
                    .get_mut(id)
                    .ok_or_else(|| TaskError::NotFound(id.clone()))?;
                let closed = task.time_tracking.close(now);
                Ok((task.clone(), closed))
            })
            .await?;

        let Some(duration) = closed else {
            debug!(task_id = %id, "No timer running");
            return Ok(None);
        };

        info!(
            task_id = %id,
            duration_ms = duration,
            total_ms = task.time_tracking.total_time_spent,
            "Paused timer"
        );
        self.push_update(id, TaskUpdate::timer(&task)).await;
        self.push_time_summary(id, duration).await;
        Ok(Some(duration))
    }

    /// Pause every session that has reached the per-session cap, crediting
    /// exactly the cap. Returns each paused id with the credited time.
    pub async fn enforce_session_cap(&self) -> Vec<(TaskId, i64)> {
        let now = self.clock.now_ms();
        let paused = self
            .commit(|state| {
                let mut paused = Vec::new();
                for task in state.tasks.iter_mut() {
                    if !task.time_tracking.session_expired(now) {
                        continue;
                    }
                    if let Some(duration) = task.time_tracking.close(now) {
                        paused.push((task.clone(), duration));
                    }
                }
                Ok(paused)
            })
            .await
            .unwrap_or_default();

        let mut ids = Vec::with_capacity(paused.len());
        for (task, duration) in paused {
            warn!(
                task_id = %task.id,
                duration_ms = duration,
                "Session reached the cap, pausing timer"
            );
            self.push_update(&task.id, TaskUpdate::timer(&task)).await;
            self.push_time_summary(&task.id, duration).await;
            ids.push((task.id, duration));
        }
        ids
    }
}
