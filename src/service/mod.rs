use crate::api::dto::{CreateTaskReq, Paginated, PaginationQuery, UpdateTaskReq};
use crate::db::queries::{ListScope, TaskRepository};
use crate::domain::{NewTask, Task, TaskReport, TaskStatus};
use crate::errors::AppError;
use sqlx::SqlitePool;

#[cfg(test)]
mod tests;

const MAX_TITLE_LEN: usize = 255;
const MAX_DESCRIPTION_LEN: usize = 1000;
const DEFAULT_PAGE_SIZE: i64 = 10;

#[derive(Clone)]
pub struct TaskService {
    db_pool: SqlitePool,
}

impl TaskService {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    fn repo(&self) -> TaskRepository<'_> {
        TaskRepository::new(&self.db_pool)
    }

    pub async fn create_task(&self, req: CreateTaskReq) -> Result<Task, AppError> {
        validate_title(&req.title)?;
        validate_description(req.description.as_deref())?;

        let task = NewTask {
            title: req.title.trim().to_string(),
            description: req.description,
            due_date: req.due_date,
            status: req.status.unwrap_or_default(),
        };

        let task = self.repo().create_task(&task).await?;
        tracing::info!(task_id = task.id, "Task created");

        Ok(task)
    }

    pub async fn list_tasks(
        &self,
        scope: ListScope,
        page: PaginationQuery,
    ) -> Result<Paginated<Task>, AppError> {
        let limit = page.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        let offset = page.offset.unwrap_or(0);

        if limit < 1 {
            return Err(AppError::ValidationError(
                "limit must not be less than 1".into(),
            ));
        }
        if offset < 0 {
            return Err(AppError::ValidationError(
                "offset must not be less than 0".into(),
            ));
        }

        let repo = self.repo();
        let data = repo.list_tasks(scope, limit, offset).await?;
        let total = repo.count_tasks(scope).await?;

        Ok(Paginated::new(data, total, limit, offset))
    }

    pub async fn get_task(&self, id: i64) -> Result<Task, AppError> {
        self.repo().get_task(id).await?.ok_or_else(|| not_found(id))
    }

    /// Applies the present fields of `req`. Moving the due date re-arms the
    /// due-date notification (see [`TaskRepository::save_task`]).
    pub async fn update_task(&self, id: i64, req: UpdateTaskReq) -> Result<Task, AppError> {
        let mut task = self.get_task(id).await?;

        if let Some(title) = req.title {
            validate_title(&title)?;
            task.title = title.trim().to_string();
        }
        if let Some(description) = req.description {
            validate_description(description.as_deref())?;
            task.description = description;
        }
        if let Some(status) = req.status {
            task.status = status;
        }
        if let Some(due_date) = req.due_date {
            task.due_date = due_date;
        }

        self.save(task).await
    }

    pub async fn delete_task(&self, id: i64) -> Result<(), AppError> {
        if self.repo().soft_delete(id).await? == 0 {
            return Err(not_found(id));
        }
        tracing::info!(task_id = id, "Task soft deleted");
        Ok(())
    }

    pub async fn restore_task(&self, id: i64) -> Result<Task, AppError> {
        let repo = self.repo();
        let task = repo
            .get_task_with_deleted(id)
            .await?
            .ok_or_else(|| not_found(id))?;

        if task.deleted_at.is_none() {
            return Err(AppError::Conflict(format!("Task with ID {id} is not deleted")));
        }

        repo.restore(id).await?;
        tracing::info!(task_id = id, "Task restored");

        self.get_task(id).await
    }

    /// Permanently removes a task, whether soft deleted or not.
    pub async fn force_delete_task(&self, id: i64) -> Result<(), AppError> {
        if self.repo().force_delete(id).await? == 0 {
            return Err(not_found(id));
        }
        tracing::info!(task_id = id, "Task permanently deleted");
        Ok(())
    }

    pub async fn toggle_status(&self, id: i64) -> Result<Task, AppError> {
        let mut task = self.get_task(id).await?;
        task.status = task.status.next();
        self.save(task).await
    }

    pub async fn update_status(&self, id: i64, status: TaskStatus) -> Result<Task, AppError> {
        let mut task = self.get_task(id).await?;
        task.status = status;
        self.save(task).await
    }

    pub async fn report(&self) -> Result<TaskReport, AppError> {
        Ok(self.repo().count_by_status().await?)
    }

    /// Registers the webhook that receives the due-date notification of a task.
    /// Any earlier delivery is forgotten so the new endpoint gets notified too.
    pub async fn register_webhook(&self, id: i64, url: &str) -> Result<String, AppError> {
        let url = validate_webhook_url(url)?;

        if self.repo().set_webhook(id, &url).await? == 0 {
            return Err(not_found(id));
        }
        tracing::info!(task_id = id, %url, "Webhook URL registered");

        Ok(format!("Webhook URL successfully registered for task {id}"))
    }

    pub async fn remove_webhook(&self, id: i64) -> Result<String, AppError> {
        if self.repo().clear_webhook(id).await? == 0 {
            return Err(not_found(id));
        }
        tracing::info!(task_id = id, "Webhook URL removed");

        Ok(format!("Webhook URL successfully removed for task {id}"))
    }

    async fn save(&self, task: Task) -> Result<Task, AppError> {
        let id = task.id;
        if self.repo().save_task(&task).await? == 0 {
            return Err(not_found(id));
        }
        self.get_task(id).await
    }
}

fn not_found(id: i64) -> AppError {
    AppError::NotFound(format!("Task with ID {id} not found"))
}

fn validate_title(title: &str) -> Result<(), AppError> {
    let len = title.trim().chars().count();
    if len == 0 {
        return Err(AppError::ValidationError("title must not be empty".into()));
    }
    if len > MAX_TITLE_LEN {
        return Err(AppError::ValidationError(format!(
            "title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_description(description: Option<&str>) -> Result<(), AppError> {
    match description {
        Some(text) if text.chars().count() > MAX_DESCRIPTION_LEN => {
            Err(AppError::ValidationError(format!(
                "description must be at most {MAX_DESCRIPTION_LEN} characters"
            )))
        }
        _ => Ok(()),
    }
}

/// Accepts absolute http(s) URLs with a host.
fn validate_webhook_url(raw: &str) -> Result<String, AppError> {
    let invalid = || AppError::ValidationError("url must be a URL address".into());

    let url = reqwest::Url::parse(raw.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }

    Ok(url.to_string())
}
