use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use sqlx::{FromRow, Type};
use std::time::Duration;


// Enums

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Open,
    InProgress,
    Done,
}

impl TaskStatus {
    /// open -> in_progress -> done -> open
    pub fn next(self) -> Self {
        match self {
            TaskStatus::Open => TaskStatus::InProgress,
            TaskStatus::InProgress => TaskStatus::Done,
            TaskStatus::Done => TaskStatus::Open,
        }
    }
}

// Structs

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub webhook_url: Option<String>,
    pub webhook_sent: bool,
}

/// Fields supplied when a task is first stored. The row id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: TaskStatus,
}

impl NewTask {
    pub fn new(title: impl Into<String>, due_date: Option<DateTime<Utc>>) -> Self {
        Self {
            title: title.into(),
            description: None,
            due_date,
            status: TaskStatus::Open,
        }
    }
}

impl Task {
    /// The webhook url, if one is registered and not blank.
    pub fn webhook_target(&self) -> Option<&str> {
        self.webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// Body POSTed to a task's webhook when its due date is near.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub task_id: i64,
    pub title: String,
    pub description: Option<String>,
    #[serde(serialize_with = "iso_millis_opt")]
    pub due_date: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub message: String,
    #[serde(serialize_with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
}

impl NotificationPayload {
    /// Builds the payload for `task`; `timestamp` is the moment of construction.
    pub fn for_task(task: &Task, lookahead: Duration) -> Self {
        Self {
            task_id: task.id,
            title: task.title.clone(),
            description: task.description.clone(),
            due_date: task.due_date,
            status: task.status,
            message: approaching_message(lookahead),
            timestamp: Utc::now(),
        }
    }
}

/// "Task due date is approaching (within 1 hour)" for the default lookahead.
pub fn approaching_message(lookahead: Duration) -> String {
    let secs = lookahead.as_secs();
    let (amount, unit) = if secs >= 3600 && secs % 3600 == 0 {
        (secs / 3600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    let plural = if amount == 1 { "" } else { "s" };
    format!("Task due date is approaching (within {amount} {unit}{plural})")
}

fn iso_millis<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn iso_millis_opt<S: Serializer>(
    value: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => iso_millis(value, serializer),
        None => serializer.serialize_none(),
    }
}

/// Count of active tasks per status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskReport {
    #[serde(rename = "OPEN")]
    pub open: i64,
    #[serde(rename = "IN_PROGRESS")]
    pub in_progress: i64,
    #[serde(rename = "DONE")]
    pub done: i64,
}
