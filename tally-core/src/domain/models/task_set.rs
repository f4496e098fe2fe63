use indexmap::IndexMap;

use super::{Task, TaskId};

/// The flat `id -> Task` arena that is the single source of truth.
///
/// Insertion order is kept so views render tasks in creation order.
/// Parent/child structure is only ever derived from `parent_id` and
/// `child_ids`; no task holds a reference to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSet {
    tasks: IndexMap<TaskId, Task>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.values_mut()
    }

    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks.keys()
    }

    /// Insert or replace a task, keeping its original position on replace.
    pub fn insert(&mut self, task: Task) -> Option<Task> {
        self.tasks.insert(task.id.clone(), task)
    }

    /// Remove a task, preserving the order of the rest.
    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        self.tasks.shift_remove(id)
    }

    /// Re-key a task in place, keeping its position.
    pub fn rename(&mut self, from: &TaskId, to: TaskId) -> bool {
        let Some(index) = self.tasks.get_index_of(from) else {
            return false;
        };
        let Some(mut task) = self.tasks.shift_remove(from) else {
            return false;
        };
        task.id = to.clone();
        self.tasks.shift_insert(index, to, task);
        true
    }

    pub fn to_vec(&self) -> Vec<Task> {
        self.tasks.values().cloned().collect()
    }
}

impl FromIterator<Task> for TaskSet {
    fn from_iter<I: IntoIterator<Item = Task>>(iter: I) -> Self {
        Self {
            tasks: iter
                .into_iter()
                .map(|task| (task.id.clone(), task))
                .collect(),
        }
    }
}

impl From<Vec<Task>> for TaskSet {
    fn from(tasks: Vec<Task>) -> Self {
        tasks.into_iter().collect()
    }
}
