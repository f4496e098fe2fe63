use serde::{Deserialize, Serialize, Serializer};
use strum::{Display, EnumString};
use time::OffsetDateTime;

use super::{TaskId, TimeTracking};

/// Lifecycle status of a task.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum TaskStatus {
    #[default]
    #[strum(ascii_case_insensitive, to_string = "open")]
    Open,
    #[strum(
        ascii_case_insensitive,
        to_string = "in-progress",
        serialize = "inprogress",
        serialize = "in_progress"
    )]
    InProgress,
    #[strum(ascii_case_insensitive, to_string = "done")]
    Done,
}

/// A unit of work with a status, an optional parent and time tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,
    #[serde(default)]
    pub child_ids: Vec<TaskId>,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub time_tracking: TimeTracking,
}

impl Task {
    pub fn new(
        id: impl Into<TaskId>,
        title: impl Into<String>,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Open,
            created_at,
            due_date: None,
            parent_id: None,
            child_ids: Vec::new(),
            depth: 0,
            time_tracking: TimeTracking::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<TaskId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_children<I, T>(mut self, child_ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.child_ids = child_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_total_time(mut self, total_ms: i64) -> Self {
        self.time_tracking.total_time_spent = total_ms;
        self
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }
}

/// Payload for creating a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInput {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,
}

impl TaskInput {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<TaskId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_due_date(mut self, due_date: OffsetDateTime) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

/// A user edit to an existing task. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    /// `Some(None)` clears the due date.
    pub due_date: Option<Option<OffsetDateTime>>,
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.due_date.is_none()
            && self.status.is_none()
    }
}

/// The partial task sent to the remote store on updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_patch_date"
    )]
    pub due_date: Option<Option<OffsetDateTime>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_tracking: Option<TimeTracking>,
}

impl TaskUpdate {
    /// Status plus time tracking, the shape every timer transition sends.
    pub fn timer(task: &Task) -> Self {
        Self {
            status: Some(task.status),
            time_tracking: Some(task.time_tracking.clone()),
            ..Default::default()
        }
    }

    /// Apply this update to a task, the way the remote store would.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(time_tracking) = &self.time_tracking {
            task.time_tracking = time_tracking.clone();
        }
    }
}

fn serialize_patch_date<S: Serializer>(
    value: &Option<Option<OffsetDateTime>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(inner) => time::serde::rfc3339::option::serialize(inner, serializer),
        None => serializer.serialize_none(),
    }
}

/// A task with its children materialized. Derived view, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub task: Task,
    pub children: Vec<TaskNode>,
}

impl TaskNode {
    /// Number of nodes in this subtree, including this one.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(TaskNode::len).sum::<usize>()
    }

    /// Depth-first search for a node by id.
    pub fn find(&self, id: &TaskId) -> Option<&TaskNode> {
        if &self.task.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

/// Authentication transitions that drive reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn status_parses_loosely() {
        assert_eq!("Done".parse::<TaskStatus>().unwrap(), TaskStatus::Done);
        assert_eq!("in-progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("InProgress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("in_progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert!("finished".parse::<TaskStatus>().is_err());
        assert_eq!(TaskStatus::InProgress.to_string(), "in-progress");
    }

    #[test]
    fn task_serializes_dates_as_rfc3339() {
        let mut task = Task::new("7", "Write report", datetime!(2024-03-01 09:30 UTC));
        task.due_date = Some(datetime!(2024-03-08 17:00 UTC));
        let json = serde_json::to_value(&task).unwrap();

        assert_eq!(json["createdAt"], "2024-03-01T09:30:00Z");
        assert_eq!(json["dueDate"], "2024-03-08T17:00:00Z");
        assert_eq!(json["status"], "Open");
        assert_eq!(json["timeTracking"]["totalTimeSpent"], 0);

        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn task_tolerates_missing_optional_fields() {
        let task: Task = serde_json::from_str(
            r#"{"id":"3","title":"Bare","createdAt":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        assert_eq!(task.status, TaskStatus::Open);
        assert!(task.child_ids.is_empty());
        assert_eq!(task.time_tracking, TimeTracking::default());
    }

    #[test]
    fn update_serializes_only_touched_fields() {
        let update = TaskUpdate {
            status: Some(TaskStatus::Done),
            due_date: Some(None),
            ..Default::default()
        };
        let json = serde_json::to_value(&update).unwrap();

        assert_eq!(json, serde_json::json!({ "dueDate": null, "status": "Done" }));
    }

    #[test]
    fn update_applies_to_task() {
        let mut task = Task::new("1", "Old", datetime!(2024-01-01 0:00 UTC));
        TaskUpdate {
            title: Some("New".to_string()),
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        }
        .apply_to(&mut task);

        assert_eq!(task.title, "New");
        assert_eq!(task.status, TaskStatus::InProgress);
    }
}
