//! Guards every path that can set a task's status to `Done`.

use super::models::{Task, TaskId, TaskSet, TaskStatus};
use super::TaskError;

/// Child ids that stop `task` from being completed.
///
/// A child id that does not resolve counts as not done.
pub fn pending_children(task: &Task, tasks: &TaskSet) -> Vec<TaskId> {
    task.child_ids
        .iter()
        .filter(|id| !tasks.get(id).is_some_and(Task::is_done))
        .cloned()
        .collect()
}

/// True iff `task` has no children or every child resolves to a done task.
pub fn can_complete(task: &Task, tasks: &TaskSet) -> bool {
    pending_children(task, tasks).is_empty()
}

/// Validate moving `task` to `target`.
///
/// Only transitions into `Done` are gated; the rejection names the
/// children still open so the caller can report them.
pub fn check_transition(task: &Task, target: TaskStatus, tasks: &TaskSet) -> Result<(), TaskError> {
    if target != TaskStatus::Done {
        return Ok(());
    }

    let pending = pending_children(task, tasks);
    if pending.is_empty() {
        Ok(())
    } else {
        Err(TaskError::IncompleteSubtasks {
            id: task.id.clone(),
            pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn task(id: &str, status: TaskStatus, children: &[&str]) -> Task {
        Task::new(id, id, OffsetDateTime::UNIX_EPOCH)
            .with_status(status)
            .with_children(children.iter().copied())
    }

    #[test]
    fn leaf_can_always_complete() {
        let leaf = task("a", TaskStatus::Open, &[]);
        let tasks: TaskSet = vec![leaf.clone()].into();

        assert!(can_complete(&leaf, &tasks));
        assert!(check_transition(&leaf, TaskStatus::Done, &tasks).is_ok());
    }

    #[test]
    fn parent_needs_all_children_done() {
        let parent = task("p", TaskStatus::InProgress, &["c1", "c2"]);
        let mut tasks: TaskSet = vec![
            parent.clone(),
            task("c1", TaskStatus::Done, &[]),
            task("c2", TaskStatus::InProgress, &[]),
        ]
        .into();

        assert!(!can_complete(&parent, &tasks));
        match check_transition(&parent, TaskStatus::Done, &tasks) {
            Err(TaskError::IncompleteSubtasks { id, pending }) => {
                assert_eq!(id, TaskId::from("p"));
                assert_eq!(pending, vec![TaskId::from("c2")]);
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        tasks.get_mut(&"c2".into()).unwrap().status = TaskStatus::Done;
        assert!(can_complete(&parent, &tasks));
    }

    #[test]
    fn missing_child_fails_closed() {
        let parent = task("p", TaskStatus::Open, &["ghost"]);
        let tasks: TaskSet = vec![parent.clone()].into();

        assert!(!can_complete(&parent, &tasks));
        assert_eq!(pending_children(&parent, &tasks), vec![TaskId::from("ghost")]);
    }

    #[test]
    fn only_done_is_gated() {
        let parent = task("p", TaskStatus::Done, &["c"]);
        let tasks: TaskSet = vec![parent.clone(), task("c", TaskStatus::Open, &[])].into();

        assert!(check_transition(&parent, TaskStatus::Open, &tasks).is_ok());
        assert!(check_transition(&parent, TaskStatus::InProgress, &tasks).is_ok());
    }
}
