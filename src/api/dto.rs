use crate::domain::{Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Request DTO for creating a new task.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskReq {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: Option<TaskStatus>,
}

/// Request DTO for a partial task update. Absent fields stay unchanged.
///
/// `description` and `dueDate` can be cleared with an explicit `null`, so they
/// are `Some(None)` in that case and `None` when the field is missing.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskReq {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub status: Option<TaskStatus>,
}

/// Only called for fields present in the body; missing ones take the default.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
pub struct UpdateStatusReq {
    pub status: TaskStatus,
}

#[derive(Deserialize)]
pub struct RegisterWebhookReq {
    pub url: String,
}

#[derive(Deserialize, Default)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Response DTO for returning task details. Webhook state stays internal.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            title: task.title,
            description: task.description,
            due_date: task.due_date,
            status: task.status,
            created_at: task.created_at,
            updated_at: task.updated_at,
            deleted_at: task.deleted_at,
        }
    }
}

/// One page of a listing.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: i64, limit: i64, offset: i64) -> Self {
        Self {
            data,
            total,
            limit,
            offset,
            has_next: offset.saturating_add(limit) < total,
            has_prev: offset > 0,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            data: self.data.into_iter().map(f).collect(),
            total: self.total,
            limit: self.limit,
            offset: self.offset,
            has_next: self.has_next,
            has_prev: self.has_prev,
        }
    }
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}
