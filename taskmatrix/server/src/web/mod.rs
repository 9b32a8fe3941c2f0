use askama::Template;
use axum::Router;
use axum::extract::{Extension, State};
use axum::http::{HeaderName, StatusCode, header};
use axum::middleware::from_fn_with_state;
use axum::response::Html;
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::sensitive_headers::SetSensitiveRequestHeadersLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{
    AuthState, CurrentUser, FilteredMakeSpan, auth_user_middleware, create_auth_router,
    login_redirect_middleware,
};
use crate::config::{self, Config};
use crate::task::web::{TaskState, create_task_router};

pub mod api;
pub mod middleware;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
}

/// Custom error type for web handler operations.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    /// Represents an error during template rendering.
    /// The specific `askama::Error` is captured as the source of this error.
    #[error("Template rendering failed")]
    Template(#[from] askama::Error),
}

impl axum::response::IntoResponse for WebError {
    fn into_response(self) -> axum::response::Response {
        let user_facing_error_message =
            "An unexpected error occurred while processing your request. Please try again later.";
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(format!(
                "<h1>Internal Server Error</h1><p>{}</p>",
                user_facing_error_message
            )),
        )
            .into_response()
    }
}

#[tracing::instrument(skip(config))]
pub async fn start_web_server(config: config::Config) -> anyhow::Result<()> {
    let server_address = format!("0.0.0.0:{}", &config.port);
    let listener = tokio::net::TcpListener::bind(&server_address).await?;
    tracing::info!("Web server running on http://{}", server_address);

    let db = Database::connect(&config.db_url).await?;
    migration::Migrator::up(&db, None).await?;
    tracing::info!("Database migrations applied successfully");

    let app = create_app(config, db);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Assembles the application router: task pages behind the session cookie,
/// the JSON API behind bearer tokens, and the public pages.
pub fn create_app(config: Config, db: DatabaseConnection) -> Router {
    let auth_state = Arc::new(AuthState::from_config(&config));
    create_app_with_auth(config, db, auth_state)
}

/// Like [`create_app`], with the session verification supplied by the caller.
pub fn create_app_with_auth(
    config: Config,
    db: DatabaseConnection,
    auth_state: Arc<AuthState>,
) -> Router {
    let task_state = Arc::new(TaskState {
        db: Arc::new(db),
        max_title_length: config.max_title_length,
    });
    let app_state = AppState {
        config: Arc::new(config),
    };

    let protected_routes = create_task_router(task_state.clone())
        .layer(middleware::TasksChangedLayer::new())
        .layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(auth_state.clone(), auth_user_middleware))
                .layer(from_fn_with_state(
                    auth_state.clone(),
                    login_redirect_middleware,
                )),
        );

    let public_routes = Router::new()
        .route("/health", axum::routing::get(health_check_handler))
        .route("/", axum::routing::get(welcome_handler))
        .route(
            "/call-to-action",
            axum::routing::get(call_to_action_handler),
        )
        .with_state(app_state)
        .merge(create_auth_router(auth_state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(auth_state.clone(), auth_user_middleware)),
        );

    let api_routes = api::create_api_router(auth_state, task_state);

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .merge(api_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api::ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetSensitiveRequestHeadersLayer::new([
                    header::AUTHORIZATION,
                    header::COOKIE,
                ]))
                .layer(TraceLayer::new_for_http().make_span_with(FilteredMakeSpan))
                .layer(CorsLayer::new().expose_headers([
                    HeaderName::from_static("hx-retarget"),
                    HeaderName::from_static("hx-reswap"),
                    HeaderName::from_static("hx-trigger"),
                ])),
        )
}

#[tracing::instrument]
pub async fn health_check_handler() -> &'static str {
    "OK"
}

#[tracing::instrument]
pub async fn welcome_handler() -> Result<Html<String>, WebError> {
    let template = IndexTemplate::new();
    template.render().map(Html).map_err(WebError::from)
}

#[tracing::instrument(skip(state))]
pub async fn call_to_action_handler(
    State(state): State<AppState>,
    current_user: Option<Extension<CurrentUser>>,
) -> Result<Html<String>, WebError> {
    let user_id = current_user.map(|Extension(user)| user.user_id);
    let template = CallToActionTemplate::new(user_id, &state.config.sign_in_url);
    template.render().map(Html).map_err(WebError::from)
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate;

impl IndexTemplate {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Template)]
#[template(path = "welcome/call_to_action.html")]
struct CallToActionTemplate<'a> {
    user_id: Option<String>,
    sign_in_url: &'a str,
}

impl<'a> CallToActionTemplate<'a> {
    pub fn new(user_id: Option<String>, sign_in_url: &'a str) -> Self {
        Self {
            user_id,
            sign_in_url,
        }
    }
}
