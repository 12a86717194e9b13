use crate::db::queries::{ListScope, TaskRepository};
use crate::domain::{NewTask, TaskReport, TaskStatus};
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

#[sqlx::test]
async fn test_create_and_get_task(pool: SqlitePool) -> sqlx::Result<()> {
    let repo = TaskRepository::new(&pool);

    // data setup
    let due = Utc::now() + Duration::days(1);
    let mut new_task = NewTask::new("test_task", Some(due));
    new_task.description = Some("pages 25-30".to_string());

    let created = repo.create_task(&new_task).await?;
    assert!(created.id > 0);
    assert_eq!(created.status, TaskStatus::Open);
    assert!(!created.webhook_sent);
    assert!(created.webhook_url.is_none());

    let fetched_task = repo.get_task(created.id).await?;
    assert!(fetched_task.is_some());
    let fetched_task = fetched_task.unwrap();

    assert_eq!(fetched_task.title, "test_task");
    assert_eq!(fetched_task.description.as_deref(), Some("pages 25-30"));
    assert_eq!(fetched_task.due_date, Some(due), "Timestamps should round-trip");

    let deleted_count = repo.soft_delete(created.id).await?;
    assert_eq!(deleted_count, 1);

    assert!(
        repo.get_task(created.id).await?.is_none(),
        "Soft deleted task should be hidden from active lookups"
    );

    let deleted_task = repo.get_task_with_deleted(created.id).await?;
    assert!(
        deleted_task.is_some_and(|t| t.deleted_at.is_some()),
        "Deleted task should have deleted_at set"
    );

    assert_eq!(repo.restore(created.id).await?, 1);
    assert_eq!(repo.restore(created.id).await?, 0, "Restoring twice is a no-op");
    assert!(repo.get_task(created.id).await?.is_some());

    assert_eq!(repo.force_delete(created.id).await?, 1);
    assert!(repo.get_task_with_deleted(created.id).await?.is_none());

    Ok(())
}

#[sqlx::test]
async fn test_candidate_window(pool: SqlitePool) -> sqlx::Result<()> {
    let repo = TaskRepository::new(&pool);
    let now = Utc::now();

    let in_window = repo
        .create_task(&NewTask::new("in_window", Some(now + Duration::minutes(30))))
        .await?;
    repo.create_task(&NewTask::new("too_far", Some(now + Duration::hours(2))))
        .await?;
    repo.create_task(&NewTask::new("past_due", Some(now - Duration::minutes(10))))
        .await?;
    repo.create_task(&NewTask::new("no_due_date", None)).await?;

    let already_sent = repo
        .create_task(&NewTask::new("already_sent", Some(now + Duration::minutes(20))))
        .await?;
    repo.set_webhook(already_sent.id, "https://example.com/hook")
        .await?;
    let already_sent = repo.get_task(already_sent.id).await?.unwrap();
    assert!(repo.mark_webhook_sent(&already_sent).await?);

    let deleted = repo
        .create_task(&NewTask::new("deleted", Some(now + Duration::minutes(15))))
        .await?;
    repo.soft_delete(deleted.id).await?;

    let candidates = repo
        .find_notification_candidates(now, now + Duration::hours(1))
        .await?;

    let ids: Vec<i64> = candidates.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![in_window.id], "Only the in-window task qualifies");

    Ok(())
}

#[sqlx::test]
async fn test_mark_sent_requires_unchanged_registration(pool: SqlitePool) -> sqlx::Result<()> {
    let repo = TaskRepository::new(&pool);
    let due = Utc::now() + Duration::minutes(30);

    let task = repo.create_task(&NewTask::new("hooked", Some(due))).await?;
    repo.set_webhook(task.id, "https://old.example.com").await?;
    let seen = repo.get_task(task.id).await?.unwrap();

    // Re-registration while the delivery to the old url is in flight.
    repo.set_webhook(task.id, "https://new.example.com").await?;
    assert!(!repo.mark_webhook_sent(&seen).await?);
    assert!(!repo.get_task(task.id).await?.unwrap().webhook_sent);

    let current = repo.get_task(task.id).await?.unwrap();
    assert!(repo.mark_webhook_sent(&current).await?);
    assert!(repo.get_task(task.id).await?.unwrap().webhook_sent);

    // Registering again re-arms the notification.
    repo.set_webhook(task.id, "https://new.example.com").await?;
    assert!(!repo.get_task(task.id).await?.unwrap().webhook_sent);

    repo.clear_webhook(task.id).await?;
    let cleared = repo.get_task(task.id).await?.unwrap();
    assert!(cleared.webhook_url.is_none());
    assert!(!cleared.webhook_sent);

    Ok(())
}

#[sqlx::test]
async fn test_listing_scopes_and_report(pool: SqlitePool) -> sqlx::Result<()> {
    let repo = TaskRepository::new(&pool);

    let mut ids = Vec::new();
    for (title, status) in [
        ("a", TaskStatus::Open),
        ("b", TaskStatus::Open),
        ("c", TaskStatus::InProgress),
        ("d", TaskStatus::Done),
    ] {
        let mut new_task = NewTask::new(title, None);
        new_task.status = status;
        ids.push(repo.create_task(&new_task).await?.id);
    }
    repo.soft_delete(ids[0]).await?;

    assert_eq!(repo.count_tasks(ListScope::Active).await?, 3);
    assert_eq!(repo.count_tasks(ListScope::All).await?, 4);
    assert_eq!(repo.count_tasks(ListScope::Deleted).await?, 1);

    let page = repo.list_tasks(ListScope::Active, 2, 0).await?;
    let titles: Vec<&str> = page.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["d", "c"], "Newest tasks come first");

    let page = repo.list_tasks(ListScope::Active, 2, 2).await?;
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].title, "b");

    let deleted = repo.list_tasks(ListScope::Deleted, 10, 0).await?;
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].id, ids[0]);

    assert_eq!(
        repo.count_by_status().await?,
        TaskReport {
            open: 1,
            in_progress: 1,
            done: 1
        }
    );

    Ok(())
}

#[sqlx::test]
async fn test_save_task_leaves_webhook_state_alone(pool: SqlitePool) -> sqlx::Result<()> {
    let repo = TaskRepository::new(&pool);
    let due = Utc::now() + Duration::minutes(30);

    let task = repo.create_task(&NewTask::new("draft", Some(due))).await?;
    repo.set_webhook(task.id, "https://example.com/new").await?;
    let current = repo.get_task(task.id).await?.unwrap();
    assert!(repo.mark_webhook_sent(&current).await?);

    // `task` was read before the registration and the delivery.
    let mut stale = task.clone();
    stale.title = "final".to_string();
    stale.status = TaskStatus::Done;
    stale.webhook_url = Some("https://example.com/old".to_string());
    stale.webhook_sent = false;

    assert_eq!(repo.save_task(&stale).await?, 1);

    let stored = repo.get_task(task.id).await?.unwrap();
    assert_eq!(stored.title, "final");
    assert_eq!(stored.status, TaskStatus::Done);
    assert_eq!(stored.webhook_url.as_deref(), Some("https://example.com/new"));
    assert!(stored.webhook_sent, "Unchanged due date keeps the sent flag");
    assert!(stored.updated_at >= task.updated_at);

    stale.due_date = Some(due + Duration::hours(1));
    repo.save_task(&stale).await?;
    let stored = repo.get_task(task.id).await?.unwrap();
    assert!(!stored.webhook_sent, "A new due date re-arms the notification");

    stale.due_date = None;
    stale.description = None;
    repo.save_task(&stale).await?;
    assert!(repo.get_task(task.id).await?.unwrap().due_date.is_none());

    Ok(())
}

#[sqlx::test]
async fn test_candidate_window_edges_are_inclusive(pool: SqlitePool) -> sqlx::Result<()> {
    let repo = TaskRepository::new(&pool);
    let from = Utc::now();
    let to = from + Duration::hours(1);

    let at_start = repo.create_task(&NewTask::new("at_start", Some(from))).await?;
    let at_end = repo.create_task(&NewTask::new("at_end", Some(to))).await?;
    repo.create_task(&NewTask::new(
        "just_before",
        Some(from - Duration::milliseconds(1)),
    ))
    .await?;
    repo.create_task(&NewTask::new("just_after", Some(to + Duration::milliseconds(1))))
        .await?;

    let mut ids: Vec<i64> = repo
        .find_notification_candidates(from, to)
        .await?
        .iter()
        .map(|t| t.id)
        .collect();
    ids.sort();

    assert_eq!(ids, vec![at_start.id, at_end.id]);

    Ok(())
}
