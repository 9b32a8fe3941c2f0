use crate::auth::CurrentUser;
use crate::task::web::TaskState;
use crate::task::{Priority, Quadrant, Task, TaskError, TaskService, TaskStatus};
use crate::web::api::v1::ErrorResponse;
use axum::{
    Extension, Router,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// JSON representation of a Task for API responses.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskJson {
    /// Unique identifier of the task
    pub id: i32,
    pub title: String,
    /// Kanban column the task sits in
    pub status: TaskStatus,
    pub is_completed: bool,
    /// When the task was completed, `null` while it is open
    pub completed_at: Option<DateTime<Utc>>,
    pub is_urgent: bool,
    pub is_important: bool,
    /// Matrix quadrant derived from the urgency and importance flags
    pub quadrant: Quadrant,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Task> for TaskJson {
    fn from(task: Task) -> Self {
        let quadrant = task.quadrant();
        Self {
            id: task.id,
            title: task.title,
            status: task.status,
            is_completed: task.is_completed,
            completed_at: task.completed_at,
            is_urgent: task.priority.is_urgent,
            is_important: task.priority.is_important,
            quadrant,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// API response for listing the caller's tasks.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TasksResponse {
    /// Tasks, newest first
    pub tasks: Vec<TaskJson>,
    /// Total number of tasks
    pub count: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub is_urgent: bool,
    #[serde(default)]
    pub is_important: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateTitleRequest {
    pub title: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    /// One of `not_started`, `in_progress`, `done`
    pub status: String,
}

/// New priority, either as a quadrant slug or as explicit flags.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum UpdatePriorityRequest {
    Quadrant {
        /// e.g. `urgent-important`
        quadrant: String,
    },
    Flags {
        is_urgent: bool,
        is_important: bool,
    },
}

impl UpdatePriorityRequest {
    fn into_priority(self) -> Result<Priority, TaskError> {
        match self {
            UpdatePriorityRequest::Quadrant { quadrant } => {
                Ok(quadrant.parse::<Quadrant>()?.priority())
            }
            UpdatePriorityRequest::Flags {
                is_urgent,
                is_important,
            } => Ok(Priority::new(is_urgent, is_important)),
        }
    }
}

/// A failed API request, rendered as an [`ErrorResponse`].
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        let (status, code) = match &err {
            TaskError::NotAuthenticated => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            TaskError::InvalidTitle(_)
            | TaskError::InvalidStatus(_)
            | TaskError::InvalidQuadrant(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_FAILED")
            }
            TaskError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            TaskError::DuplicateTitle(_) => (StatusCode::CONFLICT, "DUPLICATE_ENTRY"),
            TaskError::Database(db_err) => {
                tracing::error!("Task API database failure: {}", db_err);
                (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR")
            }
        };
        Self {
            status,
            body: ErrorResponse::new(code, err.user_message()),
        }
    }
}

impl ApiError {
    fn rejected(status: StatusCode, message: String) -> Self {
        tracing::info!("Rejected API request: {}", message);
        Self {
            status,
            body: ErrorResponse::new("VALIDATION_FAILED", message),
        }
    }
}

/// Malformed or mistyped JSON bodies, and requests without a JSON content type.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::rejected(rejection.status(), rejection.body_text())
    }
}

/// Task IDs that are not integers.
impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::rejected(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn task_service<'a>(
    state: &'a TaskState,
    current_user: &'a Option<Extension<CurrentUser>>,
) -> Result<TaskService<'a>, ApiError> {
    let caller = current_user.as_ref().map(|Extension(user)| user);
    Ok(TaskService::new(&state.db, caller)?.with_max_title_length(state.max_title_length))
}

/// Handler for GET /api/v1/tasks - Returns the caller's tasks, newest first.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    responses(
        (status = 200, description = "Successfully retrieved tasks", body = TasksResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "Tasks"
)]
pub async fn get_tasks_handler(
    State(state): State<Arc<TaskState>>,
    current_user: Option<Extension<CurrentUser>>,
) -> Result<Json<TasksResponse>, ApiError> {
    let service = task_service(&state, &current_user)?;
    let tasks: Vec<TaskJson> = service
        .get_tasks()
        .await?
        .into_iter()
        .map(TaskJson::from)
        .collect();
    let count = tasks.len();

    Ok(Json(TasksResponse { tasks, count }))
}

/// Handler for POST /api/v1/tasks - Creates a task.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    post,
    path = "/api/v1/tasks",
    request_body = CreateTaskRequest,
    responses(
        (status = 201, description = "Task created", body = TaskJson),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 409, description = "A task with this title already exists", body = ErrorResponse),
        (status = 422, description = "Invalid title", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "Tasks"
)]
pub async fn create_task_handler(
    State(state): State<Arc<TaskState>>,
    current_user: Option<Extension<CurrentUser>>,
    WithRejection(Json(payload), _): WithRejection<Json<CreateTaskRequest>, ApiError>,
) -> Result<(StatusCode, Json<TaskJson>), ApiError> {
    let service = task_service(&state, &current_user)?;
    let priority = Priority::new(payload.is_urgent, payload.is_important);
    let task = service.create_task(&payload.title, priority).await?;

    Ok((StatusCode::CREATED, Json(task.into())))
}

/// Handler for GET /api/v1/tasks/{id} - Returns one task.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{id}",
    params(("id" = i32, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task found", body = TaskJson),
        (status = 404, description = "Task not found or owned by someone else", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "Tasks"
)]
pub async fn get_task_handler(
    State(state): State<Arc<TaskState>>,
    current_user: Option<Extension<CurrentUser>>,
    WithRejection(Path(id), _): WithRejection<Path<i32>, ApiError>,
) -> Result<Json<TaskJson>, ApiError> {
    let service = task_service(&state, &current_user)?;
    let task = service.get_task(id).await?;

    Ok(Json(task.into()))
}

/// Handler for POST /api/v1/tasks/{id}/toggle - Flips completion.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    post,
    path = "/api/v1/tasks/{id}/toggle",
    params(("id" = i32, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Completion toggled", body = TaskJson),
        (status = 404, description = "Task not found or owned by someone else", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "Tasks"
)]
pub async fn toggle_task_handler(
    State(state): State<Arc<TaskState>>,
    current_user: Option<Extension<CurrentUser>>,
    WithRejection(Path(id), _): WithRejection<Path<i32>, ApiError>,
) -> Result<Json<TaskJson>, ApiError> {
    let service = task_service(&state, &current_user)?;
    let task = service.toggle_task_completion(id).await?;

    Ok(Json(task.into()))
}

/// Handler for PUT /api/v1/tasks/{id}/title - Renames a task.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    put,
    path = "/api/v1/tasks/{id}/title",
    params(("id" = i32, Path, description = "Task ID")),
    request_body = UpdateTitleRequest,
    responses(
        (status = 200, description = "Title updated", body = TaskJson),
        (status = 404, description = "Task not found or owned by someone else", body = ErrorResponse),
        (status = 409, description = "Another task already has this title", body = ErrorResponse),
        (status = 422, description = "Invalid title", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "Tasks"
)]
pub async fn update_title_handler(
    State(state): State<Arc<TaskState>>,
    current_user: Option<Extension<CurrentUser>>,
    WithRejection(Path(id), _): WithRejection<Path<i32>, ApiError>,
    WithRejection(Json(payload), _): WithRejection<Json<UpdateTitleRequest>, ApiError>,
) -> Result<Json<TaskJson>, ApiError> {
    let service = task_service(&state, &current_user)?;
    let task = service.update_task_title(id, &payload.title).await?;

    Ok(Json(task.into()))
}

/// Handler for PUT /api/v1/tasks/{id}/status - Moves a task to another column.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    put,
    path = "/api/v1/tasks/{id}/status",
    params(("id" = i32, Path, description = "Task ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = TaskJson),
        (status = 404, description = "Task not found or owned by someone else", body = ErrorResponse),
        (status = 422, description = "Invalid status", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "Tasks"
)]
pub async fn update_status_handler(
    State(state): State<Arc<TaskState>>,
    current_user: Option<Extension<CurrentUser>>,
    WithRejection(Path(id), _): WithRejection<Path<i32>, ApiError>,
    WithRejection(Json(payload), _): WithRejection<Json<UpdateStatusRequest>, ApiError>,
) -> Result<Json<TaskJson>, ApiError> {
    let service = task_service(&state, &current_user)?;
    let status: TaskStatus = payload.status.parse()?;
    let task = service.update_task_status(id, status).await?;

    Ok(Json(task.into()))
}

/// Handler for PUT /api/v1/tasks/{id}/priority - Moves a task to another quadrant.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    put,
    path = "/api/v1/tasks/{id}/priority",
    params(("id" = i32, Path, description = "Task ID")),
    request_body = UpdatePriorityRequest,
    responses(
        (status = 200, description = "Priority updated", body = TaskJson),
        (status = 404, description = "Task not found or owned by someone else", body = ErrorResponse),
        (status = 422, description = "Invalid quadrant", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "Tasks"
)]
pub async fn update_priority_handler(
    State(state): State<Arc<TaskState>>,
    current_user: Option<Extension<CurrentUser>>,
    WithRejection(Path(id), _): WithRejection<Path<i32>, ApiError>,
    WithRejection(Json(payload), _): WithRejection<Json<UpdatePriorityRequest>, ApiError>,
) -> Result<Json<TaskJson>, ApiError> {
    let service = task_service(&state, &current_user)?;
    let priority = payload.into_priority()?;
    let task = service.update_task_priority(id, priority).await?;

    Ok(Json(task.into()))
}

/// Handler for DELETE /api/v1/tasks/{id} - Deletes a task and returns it.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    delete,
    path = "/api/v1/tasks/{id}",
    params(("id" = i32, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task deleted", body = TaskJson),
        (status = 404, description = "Task not found or owned by someone else", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "Tasks"
)]
pub async fn delete_task_handler(
    State(state): State<Arc<TaskState>>,
    current_user: Option<Extension<CurrentUser>>,
    WithRejection(Path(id), _): WithRejection<Path<i32>, ApiError>,
) -> Result<Json<TaskJson>, ApiError> {
    let service = task_service(&state, &current_user)?;
    let task = service.delete_task(id).await?;

    Ok(Json(task.into()))
}

/// Creates and returns the tasks API router.
pub fn create_api_router(state: Arc<TaskState>) -> Router {
    Router::new()
        .route("/tasks", get(get_tasks_handler).post(create_task_handler))
        .route(
            "/tasks/{id}",
            get(get_task_handler).delete(delete_task_handler),
        )
        .route("/tasks/{id}/toggle", post(toggle_task_handler))
        .route("/tasks/{id}/title", put(update_title_handler))
        .route("/tasks/{id}/status", put(update_status_handler))
        .route("/tasks/{id}/priority", put(update_priority_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TitleError;
    use axum::body::Body;
    use axum::http::Request;
    use sea_orm::{DatabaseConnection, DbErr};
    use tower::ServiceExt;

    /// Router whose handlers fail if they reach the database.
    fn offline_app() -> Router {
        create_api_router(Arc::new(TaskState {
            db: Arc::new(DatabaseConnection::Disconnected),
            max_title_length: 32,
        }))
    }

    async fn error_body(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).expect("Expected a JSON error body")
    }

    #[test]
    fn maps_task_errors_to_status_codes() {
        let cases = [
            (TaskError::NotAuthenticated, StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            (
                TaskError::InvalidTitle(TitleError::Empty),
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_FAILED",
            ),
            (
                TaskError::InvalidStatus("archived".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_FAILED",
            ),
            (TaskError::NotFound(7), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (
                TaskError::DuplicateTitle("Buy milk".to_string()),
                StatusCode::CONFLICT,
                "DUPLICATE_ENTRY",
            ),
            (
                TaskError::Database(DbErr::Custom("connection reset".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            let api_error = ApiError::from(err);
            assert_eq!(api_error.status, status);
            assert_eq!(api_error.body.error, code);
        }
    }

    #[test]
    fn database_details_are_not_exposed() {
        let api_error = ApiError::from(TaskError::Database(DbErr::Custom(
            "password authentication failed".to_string(),
        )));

        assert_eq!(api_error.body.message, "Database error");
    }

    #[test]
    fn priority_request_accepts_quadrant_or_flags() {
        let by_quadrant: UpdatePriorityRequest =
            serde_json::from_str(r#"{"quadrant":"urgent-not-important"}"#).unwrap();
        let by_flags: UpdatePriorityRequest =
            serde_json::from_str(r#"{"is_urgent":false,"is_important":true}"#).unwrap();

        assert_eq!(by_quadrant.into_priority().unwrap(), Priority::new(true, false));
        assert_eq!(by_flags.into_priority().unwrap(), Priority::new(false, true));
    }

    #[tokio::test]
    async fn can_reject_mistyped_body_with_json_error() {
        let response = offline_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"title":5}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = error_body(response).await;
        assert_eq!(body["error"], "VALIDATION_FAILED");
        assert!(body["message"].as_str().unwrap().contains("title"));
    }

    #[tokio::test]
    async fn can_reject_body_without_json_content_type() {
        let response = offline_app()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/tasks/1/status")
                    .body(Body::from(r#"{"status":"done"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(error_body(response).await["error"], "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn can_reject_non_numeric_task_id_with_json_error() {
        let response = offline_app()
            .oneshot(
                Request::builder()
                    .uri("/tasks/abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_body(response).await["error"], "VALIDATION_FAILED");
    }

    #[test]
    fn priority_request_rejects_unknown_quadrant() {
        let request: UpdatePriorityRequest =
            serde_json::from_str(r#"{"quadrant":"someday"}"#).unwrap();

        assert!(matches!(
            request.into_priority(),
            Err(TaskError::InvalidQuadrant(slug)) if slug == "someday"
        ));
    }
}
