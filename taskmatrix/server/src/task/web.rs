use askama::Template;
use axum::{
    Form, Router,
    extract::{
        Extension, Path, Query, State,
        rejection::{FormRejection, PathRejection},
    },
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
};
use axum_extra::extract::WithRejection;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::CurrentUser;
use crate::board::{Board, BoardError, LocalChange, QuadrantView};
use crate::task::{Priority, Quadrant, Task, TaskError, TaskService, TaskStatus};
use crate::web::middleware::{HX_TRIGGER, TASK_ROLLBACK};

#[derive(Clone, Debug)]
pub struct TaskState {
    pub db: Arc<DatabaseConnection>,
    pub max_title_length: usize,
}

/// Which layout the task page shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    /// Tasks grouped by matrix quadrant.
    #[default]
    List,
    /// Tasks grouped by status column.
    Kanban,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::List => "list",
            ViewMode::Kanban => "kanban",
        }
    }
}

/// `?view=list|kanban&quadrant=<slug>`. Unknown values fall back to the
/// unfiltered list.
#[derive(Debug, Deserialize, Default)]
pub struct ViewQuery {
    #[serde(default)]
    view: Option<String>,
    #[serde(default)]
    quadrant: Option<String>,
}

impl ViewQuery {
    fn mode(&self) -> ViewMode {
        match self.view.as_deref() {
            Some("kanban") => ViewMode::Kanban,
            _ => ViewMode::List,
        }
    }

    fn filter(&self) -> Option<Quadrant> {
        self.quadrant.as_deref().and_then(|slug| slug.parse().ok())
    }
}

/// Everything the task view fragment renders.
pub struct TaskView {
    pub board: Board,
    pub mode: ViewMode,
    pub filter: Option<Quadrant>,
    pub max_title_length: usize,
}

impl TaskView {
    fn new(board: Board, query: &ViewQuery, max_title_length: usize) -> Self {
        Self {
            board,
            mode: query.mode(),
            filter: query.filter(),
            max_title_length,
        }
    }

    pub fn is_kanban(&self) -> bool {
        self.mode == ViewMode::Kanban
    }

    pub fn is_filtered_to(&self, slug: &str) -> bool {
        self.filter.is_some_and(|quadrant| quadrant.slug() == slug)
    }

    pub fn all_quadrants(&self) -> [Quadrant; 4] {
        Quadrant::ALL
    }

    /// Matrix cells to show, narrowed to the active filter.
    pub fn quadrants(&self) -> Vec<QuadrantView<'_>> {
        self.board.quadrants(self.filter)
    }

    /// Query string that keeps the current view across requests.
    pub fn query(&self) -> String {
        let mut query = format!("view={}", self.mode.as_str());
        if let Some(quadrant) = self.filter {
            query.push_str("&quadrant=");
            query.push_str(quadrant.slug());
        }
        query
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskForm {
    title: String,
    #[serde(default)]
    urgency: Option<String>,
    #[serde(default)]
    importance: Option<String>,
}

impl CreateTaskForm {
    /// New tasks are urgent and important unless the form says otherwise.
    fn priority(&self) -> Priority {
        Priority::new(
            self.urgency.as_deref() != Some("not-urgent"),
            self.importance.as_deref() != Some("not-important"),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct TitleForm {
    title: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusForm {
    status: String,
}

#[derive(Debug, Deserialize)]
pub struct PriorityForm {
    quadrant: String,
}

/// Custom error type for task page handlers.
#[derive(Debug, thiserror::Error)]
pub enum TaskPageError {
    /// Represents an error during template rendering.
    #[error("Template rendering failed")]
    Template(#[from] askama::Error),
    #[error(transparent)]
    Task(#[from] TaskError),
    /// The submitted form is missing a field or has one of the wrong type.
    #[error(transparent)]
    Form(#[from] FormRejection),
    #[error(transparent)]
    Path(#[from] PathRejection),
}

impl IntoResponse for TaskPageError {
    fn into_response(self) -> Response {
        let (status_code, message) = match &self {
            TaskPageError::Template(err) => {
                tracing::error!("Failed to render task page: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred while processing your request. Please try again later.".to_string(),
                )
            }
            TaskPageError::Task(err) => {
                let status_code = match err {
                    TaskError::NotAuthenticated => StatusCode::UNAUTHORIZED,
                    TaskError::NotFound(_) => StatusCode::NOT_FOUND,
                    TaskError::Database(db_err) => {
                        tracing::error!("Task page database failure: {}", db_err);
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    _ => StatusCode::UNPROCESSABLE_ENTITY,
                };
                (status_code, err.user_message())
            }
            TaskPageError::Form(rejection) => (rejection.status(), rejection.body_text()),
            TaskPageError::Path(rejection) => (rejection.status(), rejection.body_text()),
        };

        let body = ErrorMessageTemplate { message: &message }
            .render()
            .unwrap_or_else(|_| format!("<h1>Error</h1><p>{}</p>", status_code));

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("hx-retarget"),
            HeaderValue::from_static("#flash"),
        );
        headers.insert(
            HeaderName::from_static("hx-reswap"),
            HeaderValue::from_static("innerHTML"),
        );
        (status_code, headers, Html(body)).into_response()
    }
}

#[derive(Template)]
#[template(path = "tasks/tasks.html")]
pub struct TasksPageTemplate {
    pub user_id: String,
    pub view: TaskView,
}

#[derive(Template)]
#[template(path = "tasks/view.html")]
pub struct ViewFragmentTemplate {
    pub view: TaskView,
}

#[derive(Template)]
#[template(path = "tasks/error_message.html")]
pub struct ErrorMessageTemplate<'a> {
    pub message: &'a str,
}

fn task_service<'a>(
    state: &'a TaskState,
    current_user: &'a Option<Extension<CurrentUser>>,
) -> Result<TaskService<'a>, TaskError> {
    let caller = current_user.as_ref().map(|Extension(user)| user);
    Ok(TaskService::new(&state.db, caller)?.with_max_title_length(state.max_title_length))
}

/// Sends a board change to the database.
async fn persist(
    service: &TaskService<'_>,
    id: i32,
    change: &LocalChange,
) -> Result<Task, TaskError> {
    match change {
        LocalChange::Toggle => service.toggle_task_completion(id).await,
        LocalChange::Retitle(title) => service.update_task_title(id, title).await,
        LocalChange::Remove => service.delete_task(id).await,
        LocalChange::Move(status) => service.update_task_status(id, *status).await,
        LocalChange::Reprioritize(priority) => service.update_task_priority(id, *priority).await,
    }
}

fn report(err: TaskError) -> String {
    match &err {
        TaskError::Database(db_err) => tracing::error!("Task change failed: {}", db_err),
        other => tracing::info!("Task change rejected: {}", other),
    }
    err.user_message()
}

/// Renders the view fragment. A rolled back change is announced with a
/// `task-rollback` trigger instead of `tasks-changed`.
fn render_view(view: TaskView, rolled_back: bool) -> Result<Response, TaskPageError> {
    let html = ViewFragmentTemplate { view }.render()?;
    let mut response = Html(html).into_response();
    if rolled_back {
        response
            .headers_mut()
            .insert(HX_TRIGGER, HeaderValue::from_static(TASK_ROLLBACK));
    }
    Ok(response)
}

/// Loads the caller's board, applies `change` to it and reconciles it with
/// the database's answer.
async fn reconcile(
    state: &TaskState,
    current_user: &Option<Extension<CurrentUser>>,
    query: &ViewQuery,
    id: i32,
    change: Result<LocalChange, TaskError>,
) -> Result<Response, TaskPageError> {
    let service = task_service(state, current_user)?;
    let mut board = Board::new(service.get_tasks().await?);

    let rolled_back = match change.map(|change| board.begin(id, change)) {
        Ok(Ok(pending)) => {
            let result = persist(&service, pending.id(), pending.change())
                .await
                .map(Some)
                .map_err(report);
            let failed = result.is_err();
            board.settle(pending, result);
            failed
        }
        Ok(Err(BoardError::Unchanged(_))) => false,
        Ok(Err(err)) => {
            board.set_error(err.to_string());
            true
        }
        Err(err) => {
            board.set_error(report(err));
            true
        }
    };

    render_view(
        TaskView::new(board, query, state.max_title_length),
        rolled_back,
    )
}

/// Handler for GET /tasks - the task page in list or kanban layout.
#[tracing::instrument(skip(state))]
async fn tasks_page_handler(
    State(state): State<Arc<TaskState>>,
    current_user: Option<Extension<CurrentUser>>,
    Query(query): Query<ViewQuery>,
) -> Result<Html<String>, TaskPageError> {
    let service = task_service(&state, &current_user)?;
    let board = Board::new(service.get_tasks().await?);
    let template = TasksPageTemplate {
        user_id: service.owner().to_string(),
        view: TaskView::new(board, &query, state.max_title_length),
    };
    template.render().map(Html).map_err(TaskPageError::from)
}

/// Handler for GET /tasks/view - the view fragment alone.
#[tracing::instrument(skip(state))]
async fn task_view_handler(
    State(state): State<Arc<TaskState>>,
    current_user: Option<Extension<CurrentUser>>,
    Query(query): Query<ViewQuery>,
) -> Result<Response, TaskPageError> {
    let service = task_service(&state, &current_user)?;
    let board = Board::new(service.get_tasks().await?);
    render_view(TaskView::new(board, &query, state.max_title_length), false)
}

/// Handler for POST /tasks - creates a task and returns the refreshed view.
#[tracing::instrument(skip(state))]
async fn create_task_handler(
    State(state): State<Arc<TaskState>>,
    current_user: Option<Extension<CurrentUser>>,
    Query(query): Query<ViewQuery>,
    WithRejection(Form(form), _): WithRejection<Form<CreateTaskForm>, TaskPageError>,
) -> Result<Response, TaskPageError> {
    let service = task_service(&state, &current_user)?;
    let mut board = Board::new(service.get_tasks().await?);

    let rolled_back = match service.create_task(&form.title, form.priority()).await {
        Ok(task) => {
            board.add(task);
            false
        }
        Err(err) => {
            board.set_error(report(err));
            true
        }
    };

    render_view(
        TaskView::new(board, &query, state.max_title_length),
        rolled_back,
    )
}

#[tracing::instrument(skip(state))]
async fn toggle_task_handler(
    State(state): State<Arc<TaskState>>,
    current_user: Option<Extension<CurrentUser>>,
    WithRejection(Path(id), _): WithRejection<Path<i32>, TaskPageError>,
    Query(query): Query<ViewQuery>,
) -> Result<Response, TaskPageError> {
    reconcile(&state, &current_user, &query, id, Ok(LocalChange::Toggle)).await
}

#[tracing::instrument(skip(state))]
async fn update_title_handler(
    State(state): State<Arc<TaskState>>,
    current_user: Option<Extension<CurrentUser>>,
    WithRejection(Path(id), _): WithRejection<Path<i32>, TaskPageError>,
    Query(query): Query<ViewQuery>,
    WithRejection(Form(form), _): WithRejection<Form<TitleForm>, TaskPageError>,
) -> Result<Response, TaskPageError> {
    let change = LocalChange::Retitle(form.title.trim().to_string());
    reconcile(&state, &current_user, &query, id, Ok(change)).await
}

/// Handler for PUT /tasks/{id}/status - a card dropped on another column.
#[tracing::instrument(skip(state))]
async fn update_status_handler(
    State(state): State<Arc<TaskState>>,
    current_user: Option<Extension<CurrentUser>>,
    WithRejection(Path(id), _): WithRejection<Path<i32>, TaskPageError>,
    Query(query): Query<ViewQuery>,
    WithRejection(Form(form), _): WithRejection<Form<StatusForm>, TaskPageError>,
) -> Result<Response, TaskPageError> {
    let change = form.status.parse::<TaskStatus>().map(LocalChange::Move);
    reconcile(&state, &current_user, &query, id, change).await
}

/// Handler for PUT /tasks/{id}/priority - a card dropped on another quadrant.
#[tracing::instrument(skip(state))]
async fn update_priority_handler(
    State(state): State<Arc<TaskState>>,
    current_user: Option<Extension<CurrentUser>>,
    WithRejection(Path(id), _): WithRejection<Path<i32>, TaskPageError>,
    Query(query): Query<ViewQuery>,
    WithRejection(Form(form), _): WithRejection<Form<PriorityForm>, TaskPageError>,
) -> Result<Response, TaskPageError> {
    let change = form
        .quadrant
        .parse::<Quadrant>()
        .map(|quadrant| LocalChange::Reprioritize(quadrant.priority()));
    reconcile(&state, &current_user, &query, id, change).await
}

#[tracing::instrument(skip(state))]
async fn delete_task_handler(
    State(state): State<Arc<TaskState>>,
    current_user: Option<Extension<CurrentUser>>,
    WithRejection(Path(id), _): WithRejection<Path<i32>, TaskPageError>,
    Query(query): Query<ViewQuery>,
) -> Result<Response, TaskPageError> {
    reconcile(&state, &current_user, &query, id, Ok(LocalChange::Remove)).await
}

/// Creates and returns the task router with all task page routes.
pub fn create_task_router(state: Arc<TaskState>) -> Router {
    Router::new()
        .route("/tasks", get(tasks_page_handler).post(create_task_handler))
        .route("/tasks/view", get(task_view_handler))
        .route("/tasks/{id}", axum::routing::delete(delete_task_handler))
        .route("/tasks/{id}/toggle", post(toggle_task_handler))
        .route("/tasks/{id}/title", put(update_title_handler))
        .route("/tasks/{id}/status", put(update_status_handler))
        .route("/tasks/{id}/priority", put(update_priority_handler))
        .with_state(state)
}
