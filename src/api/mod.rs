pub mod dto;

use crate::api::dto::{
    CreateTaskReq, MessageResponse, Paginated, PaginationQuery, RegisterWebhookReq,
    TaskResponse, UpdateStatusReq, UpdateTaskReq,
};
use crate::db::queries::ListScope;
use crate::domain::TaskReport;
use crate::errors::AppError;
use crate::scheduler::{CycleOutcome, CycleReport, DueDateScanner};
use crate::service::TaskService;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    routing::{delete, get, patch, post},
};
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
};

use uuid::Uuid;


#[derive(Clone)]
pub struct AppState {
    pub service: TaskService,
    pub scanner: DueDateScanner,
}

#[derive(Clone, Copy)]
pub struct MakeUuidRequest;

impl MakeRequestId for MakeUuidRequest {
    fn make_request_id<B>(&mut self, _: &axum::http::Request<B>) -> Option<RequestId> {
        let uuid = Uuid::new_v4().to_string();

        let header_value =
            HeaderValue::from_str(&uuid).unwrap_or(HeaderValue::from_static("invalid-uuid"));

        Some(RequestId::new(header_value))
    }
}

/// Build the application router with all routes and middleware
///
/// # Arguments
///
/// * `service` - Task CRUD and webhook registration
/// * `scanner` - The due-date scanner, for on-demand scans
///
/// # Returns
/// * `Router` - The configured Axum router
pub fn router(service: TaskService, scanner: DueDateScanner) -> Router {
    let state = AppState { service, scanner };

    let x_request_id = HeaderName::from_static("x-request-id");

    Router::new()
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/report", get(task_report))
        .route("/tasks/all", get(list_all_tasks))
        .route("/tasks/deleted", get(list_deleted_tasks))
        .route(
            "/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/tasks/{id}/restore", patch(restore_task))
        .route("/tasks/{id}/force", delete(force_delete_task))
        .route("/tasks/{id}/toggle-status", patch(toggle_status))
        .route("/tasks/{id}/status", patch(update_status))
        .route(
            "/webhooks/{task_id}",
            post(register_webhook).delete(remove_webhook),
        )
        .route("/scheduler/scan", post(trigger_scan))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let req_id = request
                        .extensions()
                        .get::<RequestId>()
                        .map(|id| id.header_value().to_str().unwrap_or("bad-ascii"))
                        .unwrap_or("unknown");

                    tracing::info_span!(
                        "http_request",
                        request_id = %req_id,
                        method = ?request.method(),
                        uri = ?request.uri(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(tracing::Level::INFO))
                .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(SetRequestIdLayer::new(x_request_id, MakeUuidRequest))
}

/// Handler to create a new task
///
/// # Errors
///
/// * `AppError` - If validation or the insert fails (see TaskService::create_task)
async fn create_task(
    State(state): State<AppState>,
    Json(payload): Json<CreateTaskReq>,
) -> Result<(StatusCode, Json<TaskResponse>), AppError> {
    let task = state.service.create_task(payload).await?;

    Ok((StatusCode::CREATED, Json(task.into())))
}

/// Handler to list active tasks, newest first
async fn list_tasks(
    State(state): State<AppState>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<Paginated<TaskResponse>>, AppError> {
    let page = state.service.list_tasks(ListScope::Active, page).await?;
    Ok(Json(page.map(TaskResponse::from)))
}

/// Handler to list every task, soft deleted ones included
async fn list_all_tasks(
    State(state): State<AppState>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<Paginated<TaskResponse>>, AppError> {
    let page = state.service.list_tasks(ListScope::All, page).await?;
    Ok(Json(page.map(TaskResponse::from)))
}

async fn list_deleted_tasks(
    State(state): State<AppState>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<Paginated<TaskResponse>>, AppError> {
    let page = state.service.list_tasks(ListScope::Deleted, page).await?;
    Ok(Json(page.map(TaskResponse::from)))
}

async fn task_report(State(state): State<AppState>) -> Result<Json<TaskReport>, AppError> {
    Ok(Json(state.service.report().await?))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TaskResponse>, AppError> {
    Ok(Json(state.service.get_task(id).await?.into()))
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateTaskReq>,
) -> Result<Json<TaskResponse>, AppError> {
    Ok(Json(state.service.update_task(id, payload).await?.into()))
}

/// Handler to soft delete a task by its ID
///
/// # Errors
///
/// * `AppError::NotFound` - If no active task has this id
async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    state.service.delete_task(id).await?;

    Ok(Json(MessageResponse {
        message: "Task successfully deleted".to_string(),
    }))
}

async fn restore_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TaskResponse>, AppError> {
    Ok(Json(state.service.restore_task(id).await?.into()))
}

async fn force_delete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    state.service.force_delete_task(id).await?;

    Ok(Json(MessageResponse {
        message: "Task permanently deleted".to_string(),
    }))
}

async fn toggle_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TaskResponse>, AppError> {
    Ok(Json(state.service.toggle_status(id).await?.into()))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateStatusReq>,
) -> Result<Json<TaskResponse>, AppError> {
    Ok(Json(state.service.update_status(id, payload.status).await?.into()))
}

/// Handler to register the webhook notified when the task's due date approaches
///
/// # Errors
///
/// * `AppError::ValidationError` - If `url` is not an http(s) URL
/// * `AppError::NotFound` - If the task does not exist
async fn register_webhook(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    Json(payload): Json<RegisterWebhookReq>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    let message = state.service.register_webhook(task_id, &payload.url).await?;

    Ok((StatusCode::CREATED, Json(MessageResponse { message })))
}

async fn remove_webhook(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    let message = state.service.remove_webhook(task_id).await?;

    Ok(Json(MessageResponse { message }))
}

/// Handler to run one scan cycle right away
///
/// # Errors
///
/// * `AppError::Conflict` - If a cycle is already running
/// * `AppError::Database` - If the candidate query fails
async fn trigger_scan(State(state): State<AppState>) -> Result<Json<CycleReport>, AppError> {
    match state.scanner.run_cycle().await? {
        CycleOutcome::Completed(report) => Ok(Json(report)),
        CycleOutcome::Skipped => Err(AppError::Conflict(
            "A scan cycle is already running".to_string(),
        )),
    }
}
