//! Mounting, auth transitions and reconciliation with the remote store.

use std::sync::PoisonError;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::TaskEngine;
use crate::domain::{
    hierarchy::{link_children, recompute_depths},
    models::{AuthEvent, Task, TaskInput, TaskSet, TaskUpdate},
    ports::outbound::{LocalStore, RemoteTaskService, RunningTimers},
    reconcile::{apply_running_markers, merge_snapshots},
    StoreError, TaskError,
};

/// What a mount or auth transition ended up showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Only the local snapshot was loaded.
    Local { tasks: usize },
    /// Local and remote were merged.
    Merged { tasks: usize, restored: usize },
    /// The remote fetch failed and the local snapshot is shown instead.
    Fallback { tasks: usize, error: String },
}

impl SyncOutcome {
    pub fn task_count(&self) -> usize {
        match self {
            Self::Local { tasks } | Self::Merged { tasks, .. } | Self::Fallback { tasks, .. } => {
                *tasks
            }
        }
    }
}

fn loaded_or_default<T: Default>(what: &str, loaded: Result<Option<T>, StoreError>) -> T {
    match loaded {
        Ok(value) => value.unwrap_or_default(),
        Err(e) => {
            warn!(what, error = %e, "Failed to read local store, starting empty");
            T::default()
        }
    }
}

impl<R: RemoteTaskService, S: LocalStore> TaskEngine<R, S> {
    /// Mount the engine: load the local snapshot, reconcile when signed
    /// in, pause sessions over the cap, then follow the remote's auth
    /// events until [`dispose`](Self::dispose).
    pub async fn init(&self) -> SyncOutcome {
        let outcome = self.mount().await;
        self.listen_for_auth();
        outcome
    }

    /// Stop following auth events. State is kept.
    pub fn dispose(&self) {
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("Stopped auth listener");
        }
    }

    /// Load the local snapshot and, when signed in, reconcile with the remote.
    pub async fn mount(&self) -> SyncOutcome {
        let local = self.reload_local().await;
        let outcome = if self.remote.is_authenticated() {
            self.reconcile_remote().await
        } else {
            local
        };

        let paused = self.enforce_session_cap().await;
        if !paused.is_empty() {
            info!(count = paused.len(), "Paused sessions over the cap on mount");
        }
        info!(?outcome, "Mounted task engine");
        outcome
    }

    fn listen_for_auth(&self) {
        let Some(mut events) = self.remote.subscribe_auth() else {
            debug!("Remote publishes no auth events");
            return;
        };

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed auth events, resyncing on current state");
                        if engine.remote.is_authenticated() {
                            AuthEvent::SignedIn
                        } else {
                            AuthEvent::SignedOut
                        }
                    }
                    Err(RecvError::Closed) => break,
                };
                engine.handle_auth_event(event).await;
            }
            debug!("Auth event stream closed");
        });

        let previous = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Follow an auth transition: reconcile on sign-in, fall back to the
    /// local cache on sign-out.
    pub async fn handle_auth_event(&self, event: AuthEvent) -> SyncOutcome {
        info!(?event, "Auth state changed");
        match event {
            AuthEvent::SignedIn => {
                let outcome = self.reconcile_remote().await;
                self.enforce_session_cap().await;
                outcome
            }
            AuthEvent::SignedOut => self.reload_local().await,
        }
    }

    /// Replace the working set with the local store's contents.
    pub async fn reload_local(&self) -> SyncOutcome {
        let tasks = loaded_or_default("tasks", self.store.load_tasks());
        let mut expanded = loaded_or_default("expanded", self.store.load_expanded());
        let markers = loaded_or_default("running timers", self.store.load_running_timers());

        let mut tasks = TaskSet::from(tasks);
        link_children(&mut tasks);
        recompute_depths(&mut tasks);
        let restored = apply_running_markers(&mut tasks, &markers);
        if !restored.is_empty() {
            debug!(count = restored.len(), "Restored running timers from markers");
        }
        expanded.retain(|id| tasks.contains(id));

        let count = self
            .commit(|state| {
                state.tasks = tasks;
                state.expanded = expanded;
                Ok(state.tasks.len())
            })
            .await
            .unwrap_or_default();

        SyncOutcome::Local { tasks: count }
    }

    /// Fetch the remote list and merge it into the working set.
    ///
    /// If the fetch fails, the local snapshot is shown and the failure is
    /// reported through [`last_error`](Self::last_error).
    pub async fn reconcile_remote(&self) -> SyncOutcome {
        let remote_tasks = match self.remote.get_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                let err = TaskError::from(e);
                warn!(error = %err, "Remote fetch failed, falling back to local data");
                let local = self.reload_local().await;
                self.set_error(err.to_string());
                return SyncOutcome::Fallback {
                    tasks: local.task_count(),
                    error: err.to_string(),
                };
            }
        };

        let markers: RunningTimers = match self.store.load_running_timers() {
            Ok(Some(markers)) => markers,
            Ok(None) => RunningTimers::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read running timers, using in-memory markers");
                self.snapshot().await.running.clone()
            }
        };

        let remote_count = remote_tasks.len();
        let now = self.clock.now_ms();
        let (tasks, restored) = self
            .commit(|state| {
                let mut merged = merge_snapshots(&state.tasks, remote_tasks, now);
                let restored = apply_running_markers(&mut merged, &markers);
                state.expanded.retain(|id| merged.contains(id));
                state.tasks = merged;
                Ok((state.tasks.len(), restored.len()))
            })
            .await
            .unwrap_or_default();

        info!(tasks, remote = remote_count, restored, "Reconciled with remote");
        SyncOutcome::Merged { tasks, restored }
    }

    /// Create every task that only exists locally on the remote, parents
    /// before children, adopting the server ids. Returns how many were
    /// pushed. Tasks whose parent could not be pushed are left for later.
    pub async fn push_local_tasks(&self) -> Result<usize, TaskError> {
        if !self.remote.is_authenticated() {
            return Err(TaskError::StaleAuth);
        }

        let mut pending: Vec<Task> = self
            .snapshot()
            .await
            .tasks
            .iter()
            .filter(|task| !task.id.is_server_issued())
            .cloned()
            .collect();
        pending.sort_by_key(|task| task.depth);

        let mut pushed = 0;
        for task in pending {
            // Re-read: an earlier push may have swapped the parent's id.
            let Some(current) = self.task(&task.id).await else {
                continue;
            };
            if current.parent_id.as_ref().is_some_and(|p| !p.is_server_issued()) {
                debug!(task_id = %current.id, "Parent not on remote yet, skipping");
                continue;
            }

            let input = TaskInput {
                title: current.title.clone(),
                description: current.description.clone(),
                status: current.status,
                due_date: current.due_date,
                parent_id: current.parent_id.clone(),
            };
            let created = match self.remote.create_task(&input).await {
                Ok(created) => created,
                Err(e) => {
                    self.remote_failed("push task", Some(&current.id), e);
                    continue;
                }
            };
            let Some(server_id) = self.adopt_server_id(&current.id, created.id).await else {
                continue;
            };
            pushed += 1;

            if current.time_tracking != Default::default() {
                let update = TaskUpdate::timer(&current);
                if let Err(e) = self.remote.update_task(&server_id, &update).await {
                    self.remote_failed("push time tracking", Some(&server_id), e);
                }
            }
        }

        info!(pushed, "Pushed local tasks");
        Ok(pushed)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use time::OffsetDateTime;

    use super::*;
    use crate::adapters::outbound::{DevTaskService, MemoryStore};
    use crate::domain::models::{TaskId, TaskStatus, TimeEntry, TimeTracking, MAX_SESSION_MS};
    use crate::domain::ports::outbound::ManualClock;

    type Engine = TaskEngine<DevTaskService, MemoryStore>;

    fn engine(
        remote: &Arc<DevTaskService>,
        store: &Arc<MemoryStore>,
        clock: &ManualClock,
    ) -> Engine {
        TaskEngine::new(remote.clone(), store.clone(), Arc::new(clock.clone()))
    }

    fn task(id: &str, total: i64) -> Task {
        Task::new(id, format!("Task {id}"), OffsetDateTime::UNIX_EPOCH).with_total_time(total)
    }

    async fn eventually<F: Fn() -> bool>(check: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn mount_merges_local_and_remote() {
        let remote = Arc::new(DevTaskService::signed_in());
        remote.seed(vec![task("1", 500), task("2", 0)]);
        let store = Arc::new(MemoryStore::with_tasks(vec![task("1", 1_000), task("xk3f9", 250)]));
        let clock = ManualClock::new(0);
        let engine = engine(&remote, &store, &clock);

        let outcome = engine.init().await;

        assert_eq!(outcome, SyncOutcome::Merged { tasks: 3, restored: 0 });
        let tasks = engine.tasks().await;
        assert_eq!(tasks.get(&"1".into()).unwrap().time_tracking.total_time_spent, 1_000);
        assert_eq!(tasks.get(&"xk3f9".into()).unwrap().time_tracking.total_time_spent, 250);
        assert!(tasks.contains(&"2".into()));
        assert_eq!(store.tasks().len(), 3);
        engine.dispose();
    }

    #[tokio::test]
    async fn mount_signed_out_uses_local_only() {
        let remote = Arc::new(DevTaskService::new());
        remote.seed(vec![task("1", 0)]);
        let store = Arc::new(MemoryStore::with_tasks(vec![task("local-a", 0)]));
        let engine = engine(&remote, &store, &ManualClock::new(0));

        assert_eq!(engine.mount().await, SyncOutcome::Local { tasks: 1 });
        assert!(engine.task(&"1".into()).await.is_none());
    }

    #[tokio::test]
    async fn empty_store_mounts_empty() {
        let engine = engine(
            &Arc::new(DevTaskService::new()),
            &Arc::new(MemoryStore::new()),
            &ManualClock::new(0),
        );
        assert_eq!(engine.mount().await, SyncOutcome::Local { tasks: 0 });
        assert!(engine.tree().await.is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_falls_back_to_local() {
        let remote = Arc::new(DevTaskService::signed_in());
        remote.seed(vec![task("1", 0)]);
        remote.set_failing(true);
        let store = Arc::new(MemoryStore::with_tasks(vec![task("7", 40)]));
        let engine = engine(&remote, &store, &ManualClock::new(0));

        match engine.mount().await {
            SyncOutcome::Fallback { tasks, error } => {
                assert_eq!(tasks, 1);
                assert!(error.starts_with("network error"));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
        assert!(engine.task(&"7".into()).await.is_some());
        assert!(engine.take_error().is_some());
    }

    #[tokio::test]
    async fn running_marker_survives_restart() {
        let remote = Arc::new(DevTaskService::signed_in());
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(1_000);

        let first = engine(&remote, &store, &clock);
        first.mount().await;
        let id = first.create_task(TaskInput::new("Long haul")).await.unwrap();
        first.start_timer(&id).await.unwrap();

        // The remote copy never saw the session as active.
        remote.overwrite_time_tracking(&id, TimeTracking::default());

        clock.set(61_000);
        let second = engine(&remote, &store, &clock);
        assert_eq!(second.mount().await, SyncOutcome::Merged { tasks: 1, restored: 1 });

        let tracking = second.task(&id).await.unwrap().time_tracking;
        assert!(tracking.is_active);
        assert_eq!(tracking.last_started, Some(1_000));
        assert_eq!(second.elapsed(&id).await, Some(60_000));
    }

    #[tokio::test]
    async fn stale_session_is_capped_on_mount() {
        let mut running = task("local-x", 100).with_status(TaskStatus::InProgress);
        running.time_tracking.is_active = true;
        running.time_tracking.last_started = Some(0);
        running.time_tracking.time_entries = vec![TimeEntry::open(0)];
        let store = Arc::new(MemoryStore::with_tasks(vec![running]));
        let clock = ManualClock::new(MAX_SESSION_MS * 2);
        let engine = engine(&Arc::new(DevTaskService::new()), &store, &clock);

        engine.mount().await;

        let tracking = engine.task(&"local-x".into()).await.unwrap().time_tracking;
        assert!(!tracking.is_active);
        assert_eq!(tracking.total_time_spent, 100 + MAX_SESSION_MS);
        assert!(store.running_timers().is_empty());
    }

    #[tokio::test]
    async fn auth_events_drive_reconciliation() {
        let remote = Arc::new(DevTaskService::new());
        remote.seed(vec![task("1", 0)]);
        let store = Arc::new(MemoryStore::with_tasks(vec![task("local-a", 0)]));
        let engine = engine(&remote, &store, &ManualClock::new(0));

        assert_eq!(engine.init().await, SyncOutcome::Local { tasks: 1 });

        remote.sign_in();
        let persisted = store.clone();
        eventually(move || persisted.tasks().len() == 2).await;
        assert!(engine.task(&"1".into()).await.is_some());

        store.set_tasks(vec![task("local-z", 0)]);
        remote.sign_out();
        let state = engine.clone();
        eventually(move || {
            state
                .state
                .try_read()
                .map(|s| s.tasks.contains(&"local-z".into()))
                .unwrap_or(false)
        })
        .await;
        assert_eq!(engine.tasks().await.len(), 1);
        engine.dispose();
    }

    #[tokio::test]
    async fn sign_out_reloads_local_cache() {
        let remote = Arc::new(DevTaskService::signed_in());
        remote.seed(vec![task("1", 0)]);
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&remote, &store, &ManualClock::new(0));
        engine.mount().await;

        store.set_tasks(vec![task("local-cached", 0)]);
        let outcome = engine.handle_auth_event(AuthEvent::SignedOut).await;

        assert_eq!(outcome, SyncOutcome::Local { tasks: 1 });
        assert!(engine.task(&"local-cached".into()).await.is_some());
        assert!(engine.task(&"1".into()).await.is_none());
    }

    #[tokio::test]
    async fn push_creates_offline_tasks_parents_first() {
        let remote = Arc::new(DevTaskService::new());
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(0);
        let engine = engine(&remote, &store, &clock);

        let parent = engine.create_task(TaskInput::new("Offline parent")).await.unwrap();
        let child = engine
            .create_task(TaskInput::new("Offline child").with_parent(parent.clone()))
            .await
            .unwrap();
        engine.start_timer(&child).await.unwrap();
        clock.set(5_000);
        engine.pause_timer(&child).await.unwrap();

        assert!(matches!(engine.push_local_tasks().await, Err(TaskError::StaleAuth)));

        remote.sign_in();
        assert_eq!(engine.push_local_tasks().await.unwrap(), 2);

        let tasks = engine.tasks().await;
        assert!(tasks.ids().all(TaskId::is_server_issued));
        let root = tasks.iter().find(|t| t.parent_id.is_none()).unwrap();
        let leaf = tasks.iter().find(|t| t.parent_id.is_some()).unwrap();
        assert_eq!(leaf.parent_id.as_ref(), Some(&root.id));
        assert_eq!(root.child_ids, vec![leaf.id.clone()]);

        let remote_leaf = remote.task(&leaf.id).unwrap();
        assert_eq!(remote_leaf.parent_id.as_ref(), Some(&root.id));
        assert_eq!(remote_leaf.time_tracking.total_time_spent, 5_000);
    }

    #[tokio::test]
    async fn reconcile_keeps_unpushed_tasks() {
        let remote = Arc::new(DevTaskService::new());
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&remote, &store, &ManualClock::new(0));
        let id = engine.create_task(TaskInput::new("Draft")).await.unwrap();

        remote.sign_in();
        engine.handle_auth_event(AuthEvent::SignedIn).await;

        assert!(engine.task(&id).await.is_some());
        assert!(remote.tasks().is_empty());
    }
}
