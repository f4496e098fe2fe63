//! Merging a local and a remote snapshot into one working set.
//!
//! Remote is authoritative for every non-time field. Time tracking is
//! merged so recorded time is never lost: the larger total wins, running
//! sessions are never dropped on a tie, and local entry detail is kept
//! over the remote's summaries. This is a heuristic, not a conflict-free
//! merge: an offline edit to a title is overwritten by the remote copy.

use std::cmp::Ordering;

use super::hierarchy::{link_children, recompute_depths};
use super::models::{Task, TaskId, TaskSet, TaskStatus, TimeTracking};
use super::ports::outbound::RunningTimers;

/// Merge the time tracking of the same task seen locally and remotely.
pub fn merge_time(local: &TimeTracking, remote: &TimeTracking) -> TimeTracking {
    let (is_active, last_started) = match local.total_time_spent.cmp(&remote.total_time_spent) {
        Ordering::Greater => (local.is_active, local.last_started),
        Ordering::Less => (remote.is_active, remote.last_started),
        Ordering::Equal => {
            let last_started = if local.is_active {
                local.last_started
            } else if remote.is_active {
                remote.last_started
            } else {
                None
            };
            (local.is_active || remote.is_active, last_started)
        }
    };

    let time_entries = if !local.time_entries.is_empty() {
        local.time_entries.clone()
    } else {
        remote.time_entries.clone()
    };

    let mut merged = TimeTracking {
        total_time_spent: local.total_time_spent.max(remote.total_time_spent),
        is_active,
        last_started,
        time_entries,
    };
    merged.normalize();
    merged
}

/// Take the remote task, keeping the better of the two time trackers.
///
/// A session left open on a task the remote no longer has `InProgress`
/// is closed at `now`.
pub fn merge_task(local: &Task, remote: Task, now: i64) -> Task {
    let time_tracking = merge_time(&local.time_tracking, &remote.time_tracking);
    let mut task = Task {
        time_tracking,
        ..remote
    };
    settle_session(&mut task, now);
    task
}

/// Only `InProgress` tasks may have an open session.
fn settle_session(task: &mut Task, now: i64) {
    if task.status != TaskStatus::InProgress {
        task.time_tracking.close(now);
    }
}

/// Merge `remote` into `local`.
///
/// Every remote task is kept. Local tasks the remote does not know about
/// survive only if their id was never issued by the server: those were
/// created offline and have not been pushed yet. A server id missing
/// from the remote list means the task was deleted elsewhere.
pub fn merge_snapshots(local: &TaskSet, remote: Vec<Task>, now: i64) -> TaskSet {
    let mut merged: TaskSet = remote
        .into_iter()
        .map(|remote_task| match local.get(&remote_task.id) {
            Some(local_task) => merge_task(local_task, remote_task, now),
            None => {
                let mut task = remote_task;
                task.time_tracking.normalize();
                settle_session(&mut task, now);
                task
            }
        })
        .collect();

    for task in local.iter() {
        if !merged.contains(&task.id) && !task.id.is_server_issued() {
            merged.insert(task.clone());
        }
    }

    link_children(&mut merged);
    recompute_depths(&mut merged);
    merged
}

/// Re-apply running-timer markers recorded before a restart.
///
/// A marked task that is `InProgress` is forced active from the marker's
/// start time, whatever the merge produced. Returns the ids restored.
pub fn apply_running_markers(tasks: &mut TaskSet, markers: &RunningTimers) -> Vec<TaskId> {
    let mut restored = Vec::new();
    for (id, started_at) in markers {
        let Some(task) = tasks.get_mut(id) else {
            continue;
        };
        if task.status != TaskStatus::InProgress {
            continue;
        }
        task.time_tracking.force_active(*started_at);
        restored.push(id.clone());
    }
    restored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TimeEntry;
    use time::OffsetDateTime;

    fn task(id: &str, total: i64) -> Task {
        Task::new(id, format!("Task {id}"), OffsetDateTime::UNIX_EPOCH).with_total_time(total)
    }

    fn running(total: i64, started: i64) -> TimeTracking {
        TimeTracking {
            total_time_spent: total,
            is_active: true,
            last_started: Some(started),
            time_entries: vec![TimeEntry::open(started)],
        }
    }

    #[test]
    fn reconciliation_unions_offline_tasks() {
        let local: TaskSet = vec![task("1", 1_000), task("xk3f9", 250)].into();
        let remote = vec![task("1", 500), task("2", 0)];

        let merged = merge_snapshots(&local, remote, 0);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get(&"1".into()).unwrap().time_tracking.total_time_spent, 1_000);
        assert_eq!(merged.get(&"xk3f9".into()), local.get(&"xk3f9".into()));
        assert!(merged.contains(&"2".into()));
    }

    #[test]
    fn server_ids_missing_remotely_are_dropped() {
        let local: TaskSet = vec![task("9", 0)].into();
        let merged = merge_snapshots(&local, vec![], 0);
        assert!(merged.is_empty());
    }

    #[test]
    fn remote_wins_non_time_fields() {
        let mut local_task = task("1", 5_000);
        local_task.title = "Local title".to_string();
        let mut remote_task = task("1", 1_000);
        remote_task.title = "Remote title".to_string();
        remote_task.status = TaskStatus::Done;

        let merged = merge_task(&local_task, remote_task, 0);

        assert_eq!(merged.title, "Remote title");
        assert_eq!(merged.status, TaskStatus::Done);
        assert_eq!(merged.time_tracking.total_time_spent, 5_000);
    }

    #[test]
    fn remote_completion_closes_local_session() {
        let mut local_task = task("1", 0).with_status(TaskStatus::InProgress);
        local_task.time_tracking = running(5_000, 10_000);
        let remote_task = task("1", 1_000).with_status(TaskStatus::Done);

        let merged = merge_task(&local_task, remote_task, 13_000);

        assert_eq!(merged.status, TaskStatus::Done);
        assert!(!merged.time_tracking.is_active);
        assert_eq!(merged.time_tracking.last_started, None);
        assert_eq!(merged.time_tracking.total_time_spent, 8_000);
        assert_eq!(
            merged.time_tracking.time_entries.last(),
            Some(&TimeEntry::closed(10_000, 3_000))
        );
    }

    #[test]
    fn remote_only_task_cannot_run_unless_in_progress() {
        let mut remote_task = task("4", 0);
        remote_task.time_tracking = running(0, 1_000);

        let merged = merge_snapshots(&TaskSet::new(), vec![remote_task], 2_000);

        let tracking = &merged.get(&"4".into()).unwrap().time_tracking;
        assert!(!tracking.is_active);
        assert_eq!(tracking.total_time_spent, 1_000);
    }

    #[test]
    fn larger_total_owns_the_active_flag() {
        let local = TimeTracking {
            total_time_spent: 100,
            ..Default::default()
        };
        let remote = running(900, 50_000);

        let merged = merge_time(&local, &remote);

        assert!(merged.is_active);
        assert_eq!(merged.last_started, Some(50_000));
        assert_eq!(merged.time_entries.last(), Some(&TimeEntry::open(50_000)));
    }

    #[test]
    fn tie_never_drops_a_running_session() {
        let local = running(700, 10_000);
        let remote = TimeTracking {
            total_time_spent: 700,
            ..Default::default()
        };

        let merged = merge_time(&local, &remote);
        assert!(merged.is_active);
        assert_eq!(merged.last_started, Some(10_000));

        let merged = merge_time(&remote, &local);
        assert!(merged.is_active);
        assert_eq!(merged.last_started, Some(10_000));
    }

    #[test]
    fn local_entries_are_preferred() {
        let local = TimeTracking {
            total_time_spent: 300,
            time_entries: vec![TimeEntry::closed(0, 300)],
            ..Default::default()
        };
        let remote = TimeTracking {
            total_time_spent: 300,
            time_entries: vec![TimeEntry::closed(5, 295)],
            ..Default::default()
        };
        assert_eq!(merge_time(&local, &remote).time_entries, local.time_entries);

        let empty = TimeTracking::default();
        assert_eq!(merge_time(&empty, &remote).time_entries, remote.time_entries);
    }

    #[test]
    fn offline_child_is_linked_to_remote_parent() {
        let mut child = task("local-abc", 0);
        child.parent_id = Some("1".into());
        let local: TaskSet = vec![task("1", 0), child].into();

        let merged = merge_snapshots(&local, vec![task("1", 0)], 0);

        assert_eq!(merged.get(&"1".into()).unwrap().child_ids, vec![TaskId::from("local-abc")]);
        assert_eq!(merged.get(&"local-abc".into()).unwrap().depth, 1);
    }

    #[test]
    fn markers_restore_in_progress_sessions_only() {
        let mut tasks: TaskSet = vec![
            task("1", 0).with_status(TaskStatus::InProgress),
            task("2", 0).with_status(TaskStatus::Done),
        ]
        .into();
        let markers: RunningTimers = [("1".into(), 42_000), ("2".into(), 1), ("3".into(), 1)]
            .into_iter()
            .collect();

        let restored = apply_running_markers(&mut tasks, &markers);

        assert_eq!(restored, vec![TaskId::from("1")]);
        let tracking = &tasks.get(&"1".into()).unwrap().time_tracking;
        assert!(tracking.is_active);
        assert_eq!(tracking.last_started, Some(42_000));
        assert!(!tasks.get(&"2".into()).unwrap().time_tracking.is_active);
    }
}
