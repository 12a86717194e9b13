use crate::api::dto::{CreateTaskReq, PaginationQuery, UpdateTaskReq};
use crate::db::queries::{ListScope, TaskRepository};
use crate::domain::TaskStatus;
use crate::errors::AppError;
use crate::service::TaskService;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

fn create_req(title: &str) -> CreateTaskReq {
    CreateTaskReq {
        title: title.to_string(),
        description: None,
        due_date: Some(Utc::now() + Duration::minutes(30)),
        status: None,
    }
}

#[sqlx::test]
async fn test_create_task_validation(pool: SqlitePool) {
    let service = TaskService::new(pool);

    let task = service.create_task(create_req("  homework  ")).await.unwrap();
    assert_eq!(task.title, "homework");
    assert_eq!(task.status, TaskStatus::Open);

    let empty = service.create_task(create_req("   ")).await;
    assert!(matches!(empty, Err(AppError::ValidationError(_))));

    let long = service.create_task(create_req(&"x".repeat(256))).await;
    assert!(matches!(long, Err(AppError::ValidationError(_))));

    let mut req = create_req("too much text");
    req.description = Some("y".repeat(1001));
    assert!(matches!(
        service.create_task(req).await,
        Err(AppError::ValidationError(_))
    ));
}

#[sqlx::test]
async fn test_register_webhook_rearms_notification(pool: SqlitePool) {
    let service = TaskService::new(pool.clone());
    let repo = TaskRepository::new(&pool);

    let task = service.create_task(create_req("hooked")).await.unwrap();

    let message = service
        .register_webhook(task.id, "https://example.com/hook")
        .await
        .unwrap();
    assert_eq!(
        message,
        format!("Webhook URL successfully registered for task {}", task.id)
    );

    let stored = repo.get_task(task.id).await.unwrap().unwrap();
    assert!(repo.mark_webhook_sent(&stored).await.unwrap());

    service
        .register_webhook(task.id, "https://example.com/other")
        .await
        .unwrap();
    let stored = repo.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(stored.webhook_url.as_deref(), Some("https://example.com/other"));
    assert!(!stored.webhook_sent, "Re-registration resets the sent flag");

    for bad in ["not-a-url", "ftp://example.com/file", "mailto:me@example.com"] {
        assert!(matches!(
            service.register_webhook(task.id, bad).await,
            Err(AppError::ValidationError(_))
        ));
    }

    assert!(matches!(
        service.register_webhook(9999, "https://example.com").await,
        Err(AppError::NotFound(_))
    ));

    service.remove_webhook(task.id).await.unwrap();
    let stored = repo.get_task(task.id).await.unwrap().unwrap();
    assert!(stored.webhook_url.is_none());
}

#[sqlx::test]
async fn test_due_date_change_resets_sent_flag(pool: SqlitePool) {
    let service = TaskService::new(pool.clone());
    let repo = TaskRepository::new(&pool);

    let task = service.create_task(create_req("moving target")).await.unwrap();
    service
        .register_webhook(task.id, "https://example.com/hook")
        .await
        .unwrap();
    let stored = repo.get_task(task.id).await.unwrap().unwrap();
    repo.mark_webhook_sent(&stored).await.unwrap();

    let renamed = service
        .update_task(
            task.id,
            UpdateTaskReq {
                title: Some("renamed".into()),
                ..UpdateTaskReq::default()
            },
        )
        .await
        .unwrap();
    assert!(renamed.webhook_sent, "Unrelated edits keep the flag");

    let moved = service
        .update_task(
            task.id,
            UpdateTaskReq {
                due_date: Some(Some(Utc::now() + Duration::days(2))),
                ..UpdateTaskReq::default()
            },
        )
        .await
        .unwrap();
    assert!(!moved.webhook_sent, "A new due date is notified again");
}

#[sqlx::test]
async fn test_soft_delete_restore_and_force_delete(pool: SqlitePool) {
    let service = TaskService::new(pool);

    let task = service.create_task(create_req("temp")).await.unwrap();

    assert!(matches!(
        service.restore_task(task.id).await,
        Err(AppError::Conflict(_))
    ));

    service.delete_task(task.id).await.unwrap();
    assert!(matches!(
        service.get_task(task.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        service.delete_task(task.id).await,
        Err(AppError::NotFound(_))
    ));

    let deleted = service
        .list_tasks(ListScope::Deleted, PaginationQuery::default())
        .await
        .unwrap();
    assert_eq!(deleted.total, 1);

    let restored = service.restore_task(task.id).await.unwrap();
    assert!(restored.deleted_at.is_none());

    service.force_delete_task(task.id).await.unwrap();
    assert!(matches!(
        service.force_delete_task(task.id).await,
        Err(AppError::NotFound(_))
    ));
}

#[sqlx::test]
async fn test_status_transitions_and_report(pool: SqlitePool) {
    let service = TaskService::new(pool);

    let task = service.create_task(create_req("cycle")).await.unwrap();
    let task = service.toggle_status(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    let task = service.toggle_status(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    let task = service.toggle_status(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Open);

    let other = service.create_task(create_req("other")).await.unwrap();
    service
        .update_status(other.id, TaskStatus::Done)
        .await
        .unwrap();

    let report = service.report().await.unwrap();
    assert_eq!((report.open, report.in_progress, report.done), (1, 0, 1));
}

#[sqlx::test]
async fn test_pagination_bounds(pool: SqlitePool) {
    let service = TaskService::new(pool);

    for i in 0..3 {
        service.create_task(create_req(&format!("task {i}"))).await.unwrap();
    }

    let page = service
        .list_tasks(
            ListScope::Active,
            PaginationQuery {
                limit: Some(2),
                offset: Some(0),
            },
        )
        .await
        .unwrap();
    assert_eq!(page.data.len(), 2);
    assert_eq!(page.total, 3);
    assert!(page.has_next);
    assert!(!page.has_prev);

    let zero_limit = service
        .list_tasks(
            ListScope::Active,
            PaginationQuery {
                limit: Some(0),
                offset: None,
            },
        )
        .await;
    assert!(matches!(zero_limit, Err(AppError::ValidationError(_))));
}

#[sqlx::test]
async fn test_update_can_clear_optional_fields(pool: SqlitePool) {
    let service = TaskService::new(pool);

    let mut req = create_req("with extras");
    req.description = Some("notes".into());
    let task = service.create_task(req).await.unwrap();
    assert!(task.due_date.is_some());

    let kept = service
        .update_task(task.id, UpdateTaskReq::default())
        .await
        .unwrap();
    assert_eq!(kept.due_date, task.due_date);
    assert_eq!(kept.description.as_deref(), Some("notes"));

    let cleared = service
        .update_task(
            task.id,
            UpdateTaskReq {
                description: Some(None),
                due_date: Some(None),
                ..UpdateTaskReq::default()
            },
        )
        .await
        .unwrap();
    assert!(cleared.due_date.is_none());
    assert!(cleared.description.is_none());
}
