use crate::domain::{NewTask, Task, TaskReport, TaskStatus};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

const TASK_COLUMNS: &str = "id, title, description, due_date, status, created_at, updated_at, \
     deleted_at, webhook_url, webhook_sent";

/// Which rows a listing covers with respect to soft deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    Active,
    All,
    Deleted,
}

impl ListScope {
    fn filter(&self) -> &'static str {
        match self {
            ListScope::Active => "WHERE deleted_at IS NULL",
            ListScope::All => "",
            ListScope::Deleted => "WHERE deleted_at IS NOT NULL",
        }
    }

    fn order(&self) -> &'static str {
        match self {
            ListScope::Deleted => "ORDER BY deleted_at DESC, id DESC",
            _ => "ORDER BY created_at DESC, id DESC",
        }
    }
}

pub struct TaskRepository<'a> {
    pub pool: &'a SqlitePool,
}

impl<'a> TaskRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates a new task in the database.
    ///
    /// # Arguments
    ///
    /// * `task` - The fields of the task to be created.
    ///
    /// # Returns
    /// * `sqlx::Result<Task>` - The stored row, including its assigned id.
    pub async fn create_task(&self, task: &NewTask) -> sqlx::Result<Task> {
        let now = Utc::now();

        let query = format!(
            r#"
            INSERT INTO tasks (title, description, due_date, status, created_at, updated_at, webhook_sent)
            VALUES (?, ?, ?, ?, ?, ?, 0)
            RETURNING {TASK_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Task>(&query)
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.due_date)
            .bind(task.status)
            .bind(now)
            .bind(now)
            .fetch_one(self.pool)
            .await
    }

    /// Retrieves an active (not soft deleted) task by its ID.
    ///
    /// # Arguments
    ///
    /// * `id` - The id of the task to retrieve.
    ///
    /// # Returns
    /// * `sqlx::Result<Option<Task>>` - The Task if found, or None if missing or deleted.
    pub async fn get_task(&self, id: i64) -> sqlx::Result<Option<Task>> {
        let query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ? AND deleted_at IS NULL");

        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(self.pool)
            .await
    }

    pub async fn get_task_with_deleted(&self, id: i64) -> sqlx::Result<Option<Task>> {
        let query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?");

        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(self.pool)
            .await
    }

    pub async fn list_tasks(
        &self,
        scope: ListScope,
        limit: i64,
        offset: i64,
    ) -> sqlx::Result<Vec<Task>> {
        let query = format!(
            "SELECT {TASK_COLUMNS} FROM tasks {} {} LIMIT ? OFFSET ?",
            scope.filter(),
            scope.order()
        );

        sqlx::query_as::<_, Task>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool)
            .await
    }

    pub async fn count_tasks(&self, scope: ListScope) -> sqlx::Result<i64> {
        let query = format!("SELECT COUNT(*) FROM tasks {}", scope.filter());

        sqlx::query_scalar(&query).fetch_one(self.pool).await
    }

    /// Persists the user editable columns of `task` and bumps `updated_at`.
    ///
    /// `webhook_url` and `webhook_sent` are never written from `task`; they
    /// belong to the registration and scanner paths. Moving the due date
    /// clears `webhook_sent` so the new date gets its own notification.
    ///
    /// # Returns
    /// * `sqlx::Result<u64>` - Number of rows affected (0 when the id is unknown).
    pub async fn save_task(&self, task: &Task) -> sqlx::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET title = ?, description = ?, status = ?,
                webhook_sent = CASE WHEN due_date IS ? THEN webhook_sent ELSE 0 END,
                due_date = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status)
        .bind(task.due_date)
        .bind(task.due_date)
        .bind(Utc::now())
        .bind(task.id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Soft deletes a task by setting its deleted_at timestamp.
    ///
    /// # Returns
    /// * `sqlx::Result<u64>` - Result containing the number of rows affected.
    pub async fn soft_delete(&self, id: i64) -> sqlx::Result<u64> {
        tracing::debug!(task_id = id, "Soft deleting task");
        let result =
            sqlx::query("UPDATE tasks SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(Utc::now())
                .bind(id)
                .execute(self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    pub async fn restore(&self, id: i64) -> sqlx::Result<u64> {
        let result = sqlx::query(
            "UPDATE tasks SET deleted_at = NULL, updated_at = ? WHERE id = ? AND deleted_at IS NOT NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Physically removes the row, deleted or not.
    pub async fn force_delete(&self, id: i64) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn count_by_status(&self) -> sqlx::Result<TaskReport> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS total
            FROM tasks
            WHERE deleted_at IS NULL
            GROUP BY status
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        let mut report = TaskReport::default();
        for row in rows {
            let total: i64 = row.try_get("total")?;
            match row.try_get::<TaskStatus, _>("status")? {
                TaskStatus::Open => report.open = total,
                TaskStatus::InProgress => report.in_progress = total,
                TaskStatus::Done => report.done = total,
            }
        }

        Ok(report)
    }

    /// Registers `url` on an active task and re-arms its notification.
    pub async fn set_webhook(&self, id: i64, url: &str) -> sqlx::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET webhook_url = ?, webhook_sent = 0, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(url)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn clear_webhook(&self, id: i64) -> sqlx::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET webhook_url = NULL, webhook_sent = 0, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Active, not yet notified tasks whose due date lies in `[from, to]`.
    ///
    /// Tasks without a webhook url are included so the caller can report them.
    pub async fn find_notification_candidates(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> sqlx::Result<Vec<Task>> {
        let query = format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM tasks
            WHERE deleted_at IS NULL
              AND webhook_sent = 0
              AND due_date IS NOT NULL
              AND due_date BETWEEN ? AND ?
            ORDER BY due_date ASC
            "#
        );

        sqlx::query_as::<_, Task>(&query)
            .bind(from)
            .bind(to)
            .fetch_all(self.pool)
            .await
    }

    /// Flags `task` as notified.
    ///
    /// Only succeeds while the row still carries the url and due date that were
    /// delivered to, so a re-registration or reschedule that happened during
    /// the delivery keeps the task eligible.
    ///
    /// # Returns
    /// * `sqlx::Result<bool>` - Whether the flag was flipped.
    pub async fn mark_webhook_sent(&self, task: &Task) -> sqlx::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET webhook_sent = 1, updated_at = ?
            WHERE id = ?
              AND webhook_sent = 0
              AND webhook_url IS ?
              AND due_date IS ?
            "#,
        )
        .bind(Utc::now())
        .bind(task.id)
        .bind(&task.webhook_url)
        .bind(task.due_date)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
