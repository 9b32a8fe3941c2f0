use crate::auth::{AuthState, CurrentUser};
use crate::web::api::v1::ErrorResponse;
use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// Returns the token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// API authentication middleware that extracts the current user from Authorization Bearer header.
/// Sets the CurrentUser extension if the token verifies.
pub async fn auth_user_middleware(
    State(state): State<Arc<AuthState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    let current_user = bearer_token(&headers).and_then(|token| state.verifier.verify(token));
    if let Some(current_user) = current_user {
        request.extensions_mut().insert(current_user);
    }

    next.run(request).await
}

/// Middleware that ensures the current user is authenticated.
/// Returns UNAUTHORIZED if the CurrentUser extension is not found in the request.
/// This middleware should be applied after auth_user_middleware.
pub async fn require_auth_middleware(request: Request, next: Next) -> Response {
    let is_authenticated = request.extensions().get::<CurrentUser>().is_some();

    if !is_authenticated {
        let error_response = ErrorResponse::new("UNAUTHENTICATED", "Not authenticated");
        return (StatusCode::UNAUTHORIZED, Json(error_response)).into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MockSessionVerifier;
    use axum::Router;
    use axum::body::Body;
    use axum::middleware::{from_fn, from_fn_with_state};
    use tower::ServiceExt;

    fn api_app(verifier: MockSessionVerifier) -> Router {
        let state = Arc::new(AuthState {
            verifier: Arc::new(verifier),
            sign_in_url: "/auth/sign-in".to_string(),
        });
        Router::new()
            .route(
                "/whoami",
                axum::routing::get(
                    |axum::Extension(user): axum::Extension<CurrentUser>| async move {
                        user.user_id
                    },
                ),
            )
            .layer(from_fn(require_auth_middleware))
            .layer(from_fn_with_state(state, auth_user_middleware))
    }

    #[test]
    fn can_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc.def".parse().unwrap());

        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[test]
    fn ignores_other_authorization_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic dXNlcjpwYXNz".parse().unwrap());

        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn can_reject_requests_without_token() {
        let mut verifier = MockSessionVerifier::new();
        verifier.expect_verify().never();

        let response = api_app(verifier)
            .oneshot(
                axum::http::Request::builder()
                    .uri("/whoami")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "UNAUTHENTICATED");
        assert_eq!(json["message"], "Not authenticated");
    }

    #[tokio::test]
    async fn can_accept_verified_bearer_token() {
        let mut verifier = MockSessionVerifier::new();
        verifier
            .expect_verify()
            .withf(|token| token == "good-token")
            .returning(|_| Some(CurrentUser::new("user_123")));

        let response = api_app(verifier)
            .oneshot(
                axum::http::Request::builder()
                    .uri("/whoami")
                    .header("authorization", "Bearer good-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, "user_123");
    }
}
