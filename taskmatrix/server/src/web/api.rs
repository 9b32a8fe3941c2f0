use std::sync::Arc;

use crate::{
    auth::{self, AuthState},
    task::{self, web::TaskState},
};

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
};

use tower::ServiceBuilder;
use utoipa::OpenApi;

pub mod v1 {
    use serde::{Deserialize, Serialize};
    use utoipa::ToSchema;

    /// JSON body returned for every failed API request.
    #[derive(Debug, Serialize, Deserialize, ToSchema)]
    pub struct ErrorResponse {
        /// Machine-readable error code, e.g. `NOT_FOUND`
        pub error: String,
        /// Human-readable description of the error
        pub message: String,
    }

    impl ErrorResponse {
        pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
            Self {
                error: error.into(),
                message: message.into(),
            }
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        task::api::v1::get_tasks_handler,
        task::api::v1::create_task_handler,
        task::api::v1::get_task_handler,
        task::api::v1::toggle_task_handler,
        task::api::v1::update_title_handler,
        task::api::v1::update_status_handler,
        task::api::v1::update_priority_handler,
        task::api::v1::delete_task_handler,
    ),
    components(schemas(
        task::api::v1::TaskJson,
        task::api::v1::TasksResponse,
        task::api::v1::CreateTaskRequest,
        task::api::v1::UpdateTitleRequest,
        task::api::v1::UpdateStatusRequest,
        task::api::v1::UpdatePriorityRequest,
        task::TaskStatus,
        task::Quadrant,
        v1::ErrorResponse,
    )),
    modifiers(&BearerSecurity),
    tags((name = "Tasks", description = "Task management for the signed-in user"))
)]
pub struct ApiDoc;

struct BearerSecurity;

impl utoipa::Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Creates the API routes for JSON API endpoints.
pub fn create_api_router(auth_state: Arc<AuthState>, task_state: Arc<TaskState>) -> Router {
    let tasks_router = task::api::v1::create_api_router(task_state);
    let protected_routes = tasks_router
        .layer(ServiceBuilder::new().layer(from_fn(auth::api::v1::require_auth_middleware)));
    Router::new()
        .nest("/api/v1", protected_routes)
        .layer(ServiceBuilder::new().layer(from_fn_with_state(
            auth_state,
            auth::api::v1::auth_user_middleware,
        )))
}
