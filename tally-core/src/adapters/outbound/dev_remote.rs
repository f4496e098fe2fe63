use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard, PoisonError,
};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::broadcast;

use crate::domain::{
    models::{AuthEvent, Task, TaskId, TaskInput, TaskSet, TaskStatus, TaskUpdate, TimeTracking},
    ports::outbound::RemoteTaskService,
    RemoteError,
};

/// In-process stand-in for the remote task store.
///
/// Issues numeric ids, publishes auth events on [`sign_in`] and
/// [`sign_out`], and can be told to fail every call.
///
/// [`sign_in`]: DevTaskService::sign_in
/// [`sign_out`]: DevTaskService::sign_out
#[derive(Debug)]
pub struct DevTaskService {
    store: Mutex<DevStore>,
    authenticated: AtomicBool,
    failing: AtomicBool,
    events: broadcast::Sender<AuthEvent>,
}

#[derive(Debug, Default)]
struct DevStore {
    tasks: TaskSet,
    next_id: i64,
    summaries: Vec<(TaskId, i64)>,
}

impl Default for DevTaskService {
    fn default() -> Self {
        Self::new()
    }
}

impl DevTaskService {
    /// An empty, signed-out store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            store: Mutex::new(DevStore {
                next_id: 1,
                ..Default::default()
            }),
            authenticated: AtomicBool::new(false),
            failing: AtomicBool::new(false),
            events,
        }
    }

    pub fn signed_in() -> Self {
        let service = Self::new();
        service.authenticated.store(true, Ordering::SeqCst);
        service
    }

    /// A signed-in store with a small project tree.
    pub fn demo() -> Self {
        let service = Self::signed_in();
        let now = OffsetDateTime::now_utc();
        let task = |id: i64, title: &str| Task::new(id, title, now);

        service.seed(vec![
            task(1, "Release 1.4")
                .with_description("Cut the release branch and ship")
                .with_status(TaskStatus::InProgress)
                .with_children([2_i64, 3, 4]),
            task(2, "Write changelog").with_parent(1_i64).with_status(TaskStatus::Done),
            task(3, "Fix login redirect")
                .with_parent(1_i64)
                .with_status(TaskStatus::InProgress)
                .with_total_time(45 * 60 * 1000),
            task(4, "Tag and publish").with_parent(1_i64),
            task(5, "Plan next sprint").with_description("Backlog grooming with the team"),
        ]);
        service
    }

    fn lock(&self) -> MutexGuard<'_, DevStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the stored tasks. Later creates get ids above the largest
    /// numeric id seen.
    pub fn seed(&self, tasks: Vec<Task>) {
        let mut store = self.lock();
        let max_id = tasks
            .iter()
            .filter_map(|task| task.id.as_str().parse::<i64>().ok())
            .max()
            .unwrap_or(0);
        store.next_id = store.next_id.max(max_id + 1);
        store.tasks = tasks.into();
    }

    pub fn sign_in(&self) {
        self.authenticated.store(true, Ordering::SeqCst);
        let _ = self.events.send(AuthEvent::SignedIn);
    }

    pub fn sign_out(&self) {
        self.authenticated.store(false, Ordering::SeqCst);
        let _ = self.events.send(AuthEvent::SignedOut);
    }

    /// Make every call fail with a transport error until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.lock().tasks.get(id).cloned()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.lock().tasks.to_vec()
    }

    pub fn time_summaries(&self) -> Vec<(TaskId, i64)> {
        self.lock().summaries.clone()
    }

    /// Overwrite a task's time tracking behind the engine's back.
    pub fn overwrite_time_tracking(&self, id: &TaskId, time_tracking: TimeTracking) {
        if let Some(task) = self.lock().tasks.get_mut(id) {
            task.time_tracking = time_tracking;
        }
    }

    fn check(&self) -> Result<(), RemoteError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("dev remote unavailable".to_string()));
        }
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(RemoteError::Unauthorized);
        }
        Ok(())
    }
}

fn not_found(id: &TaskId) -> RemoteError {
    RemoteError::Server {
        status: 404,
        message: format!("task {id} not found"),
    }
}

#[async_trait]
impl RemoteTaskService for DevTaskService {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, RemoteError> {
        self.check()?;
        Ok(self.tasks())
    }

    async fn create_task(&self, input: &TaskInput) -> Result<Task, RemoteError> {
        self.check()?;
        let mut store = self.lock();

        let id = TaskId::from(store.next_id);
        store.next_id += 1;

        let mut task = Task::new(id.clone(), input.title.clone(), OffsetDateTime::now_utc())
            .with_description(input.description.clone())
            .with_status(input.status);
        task.due_date = input.due_date;

        if let Some(parent_id) = &input.parent_id {
            let parent = store.tasks.get_mut(parent_id).ok_or_else(|| not_found(parent_id))?;
            parent.child_ids.push(id.clone());
            task.parent_id = Some(parent_id.clone());
        }

        store.tasks.insert(task.clone());
        Ok(task)
    }

    async fn update_task(&self, id: &TaskId, update: &TaskUpdate) -> Result<Task, RemoteError> {
        self.check()?;
        let mut store = self.lock();
        let task = store.tasks.get_mut(id).ok_or_else(|| not_found(id))?;
        update.apply_to(task);
        Ok(task.clone())
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), RemoteError> {
        self.check()?;
        let mut store = self.lock();
        let removed = store.tasks.remove(id).ok_or_else(|| not_found(id))?;
        if let Some(parent_id) = removed.parent_id {
            if let Some(parent) = store.tasks.get_mut(&parent_id) {
                parent.child_ids.retain(|child| child != id);
            }
        }
        Ok(())
    }

    async fn record_time_summary(&self, id: &TaskId, duration_ms: i64) -> Result<(), RemoteError> {
        self.check()?;
        let mut store = self.lock();
        if !store.tasks.contains(id) {
            return Err(not_found(id));
        }
        store.summaries.push((id.clone(), duration_ms));
        Ok(())
    }

    fn subscribe_auth(&self) -> Option<broadcast::Receiver<AuthEvent>> {
        Some(self.events.subscribe())
    }
}
