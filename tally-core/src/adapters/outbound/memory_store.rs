use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard, PoisonError,
};

use crate::domain::{
    models::Task,
    ports::outbound::{ExpandedNodes, LocalStore, RunningTimers},
    StoreError,
};

/// Local store kept in memory. Used for tests and the `--dev` demo.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
}

#[derive(Debug, Default)]
struct Inner {
    tasks: Option<Vec<Task>>,
    expanded: Option<ExpandedNodes>,
    running: Option<RunningTimers>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let store = Self::new();
        store.set_tasks(tasks);
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every save fail until switched off. Loads keep working.
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    pub fn set_tasks(&self, tasks: Vec<Task>) {
        self.lock().tasks = Some(tasks);
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.lock().tasks.clone().unwrap_or_default()
    }

    pub fn expanded(&self) -> ExpandedNodes {
        self.lock().expanded.clone().unwrap_or_default()
    }

    pub fn running_timers(&self) -> RunningTimers {
        self.lock().running.clone().unwrap_or_default()
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is read-only".to_string()));
        }
        Ok(())
    }
}

impl LocalStore for MemoryStore {
    fn load_tasks(&self) -> Result<Option<Vec<Task>>, StoreError> {
        Ok(self.lock().tasks.clone())
    }

    fn save_tasks(&self, tasks: &[Task]) -> Result<(), StoreError> {
        self.check_write()?;
        self.lock().tasks = Some(tasks.to_vec());
        Ok(())
    }

    fn load_expanded(&self) -> Result<Option<ExpandedNodes>, StoreError> {
        Ok(self.lock().expanded.clone())
    }

    fn save_expanded(&self, expanded: &ExpandedNodes) -> Result<(), StoreError> {
        self.check_write()?;
        self.lock().expanded = Some(expanded.clone());
        Ok(())
    }

    fn load_running_timers(&self) -> Result<Option<RunningTimers>, StoreError> {
        Ok(self.lock().running.clone())
    }

    fn save_running_timers(&self, timers: &RunningTimers) -> Result<(), StoreError> {
        self.check_write()?;
        self.lock().running = Some(timers.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    #[test]
    fn empty_until_written() {
        let store = MemoryStore::new();
        assert!(store.load_tasks().unwrap().is_none());

        store.save_tasks(&[Task::new("1", "One", OffsetDateTime::UNIX_EPOCH)]).unwrap();
        assert_eq!(store.load_tasks().unwrap().unwrap().len(), 1);
    }

    #[test]
    fn failing_writes_leave_data_untouched() {
        let store =
            MemoryStore::with_tasks(vec![Task::new("1", "One", OffsetDateTime::UNIX_EPOCH)]);
        store.set_failing(true);

        assert!(matches!(store.save_tasks(&[]), Err(StoreError::Unavailable(_))));
        assert_eq!(store.tasks().len(), 1);
    }
}
