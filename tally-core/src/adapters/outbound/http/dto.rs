use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::models::{Task, TaskId, TaskStatus, TimeTracking};

/// Ids arrive as JSON numbers from the server, but tolerate strings too.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    Number(i64),
    Text(String),
}

impl From<WireId> for TaskId {
    fn from(id: WireId) -> Self {
        match id {
            WireId::Number(n) => TaskId::from(n),
            WireId::Text(s) => TaskId::from(s),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDto {
    pub id: WireId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
    #[serde(default)]
    pub parent_id: Option<WireId>,
    #[serde(default)]
    pub child_ids: Vec<WireId>,
    #[serde(default)]
    pub time_tracking: TimeTracking,
}

impl From<TaskDto> for Task {
    fn from(dto: TaskDto) -> Self {
        Task {
            id: dto.id.into(),
            title: dto.title,
            description: dto.description.unwrap_or_default(),
            status: dto.status,
            created_at: dto.created_at,
            due_date: dto.due_date,
            parent_id: dto.parent_id.map(Into::into),
            child_ids: dto.child_ids.into_iter().map(Into::into).collect(),
            // Recomputed from the parent links once the list is merged.
            depth: 0,
            time_tracking: dto.time_tracking,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSummaryRequest {
    pub duration_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_become_server_ids() {
        let dto: TaskDto = serde_json::from_str(
            r#"{
                "id": 12,
                "title": "Ship it",
                "description": null,
                "status": "InProgress",
                "createdAt": "2024-05-01T08:00:00Z",
                "parentId": 3,
                "childIds": [13, "14"],
                "timeTracking": { "totalTimeSpent": 1200, "isActive": false, "timeEntries": [] }
            }"#,
        )
        .unwrap();

        let task = Task::from(dto);
        assert_eq!(task.id, TaskId::from("12"));
        assert!(task.id.is_server_issued());
        assert_eq!(task.parent_id, Some(TaskId::from("3")));
        assert_eq!(task.child_ids, vec![TaskId::from("13"), TaskId::from("14")]);
        assert_eq!(task.description, "");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.time_tracking.total_time_spent, 1200);
    }

    #[test]
    fn time_summary_is_camel_case() {
        let json = serde_json::to_value(TimeSummaryRequest { duration_ms: 500 }).unwrap();
        assert_eq!(json, serde_json::json!({ "durationMs": 500 }));
    }
}
