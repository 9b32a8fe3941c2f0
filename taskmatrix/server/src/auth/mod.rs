use askama::Template;
use axum::Router;
use axum::extract::{Extension, MatchedPath, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;
use tower_http::trace::MakeSpan;
use tracing::Span;

use crate::config::Config;

pub mod api;

/// Name of the cookie holding the session token.
pub const AUTH_COOKIE: &str = "auth_token";

/// Represents the currently authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    /// Identifier assigned by the identity provider.
    pub user_id: String,
}

impl CurrentUser {
    /// Creates a new CurrentUser instance.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Verifies session tokens issued by the identity provider.
#[cfg_attr(test, mockall::automock)]
pub trait SessionVerifier: Send + Sync {
    /// Returns the user a token belongs to, or `None` if the token is invalid
    /// or expired.
    fn verify(&self, token: &str) -> Option<CurrentUser>;
}

/// Verifies HS256 tokens signed with the secret shared with the provider.
pub struct JwtSessionVerifier {
    jwt_secret: String,
}

impl JwtSessionVerifier {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
        }
    }
}

impl SessionVerifier for JwtSessionVerifier {
    fn verify(&self, token: &str) -> Option<CurrentUser> {
        match decode_jwt(token, &self.jwt_secret) {
            Ok(claims) => Some(CurrentUser::new(claims.sub)),
            Err(err) => {
                tracing::debug!("Rejected session token: {}", err);
                None
            }
        }
    }
}

/// Authentication state shared by the middlewares and auth routes.
#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<dyn SessionVerifier>,
    pub sign_in_url: String,
}

impl AuthState {
    /// Creates a new AuthState from the application config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            verifier: Arc::new(JwtSessionVerifier::new(config.jwt_secret.clone())),
            sign_in_url: config.sign_in_url.clone(),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub struct Claims {
    pub sub: String, // User ID at the identity provider
    pub exp: usize,  // Expiry time of the token
    pub iat: usize,  // Issued at time of the token
}

/// Custom error type for authentication operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Represents an error during template rendering.
    #[error("Template rendering failed")]
    Template(#[from] askama::Error),
    /// The provider handed over a token that does not verify.
    #[error("Invalid session token")]
    InvalidToken,
}

impl axum::response::IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AuthError::InvalidToken => {
                let page = InvalidTokenTemplate.render().unwrap_or_else(|_| {
                    "<h1>Sign-in failed</h1><p>Your session could not be verified.</p>".to_string()
                });
                (StatusCode::UNAUTHORIZED, Html(page)).into_response()
            }
            AuthError::Template(_) => {
                let user_facing_error_message = "An unexpected error occurred while processing your request. Please try again later.";
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
    }
}

/// Creates the router for signing in through the identity provider and signing out.
pub fn create_auth_router(state: Arc<AuthState>) -> Router<()> {
    Router::new()
        .route("/auth/sign-in", axum::routing::get(sign_in_page_handler))
        .route("/auth/callback", axum::routing::get(callback_handler))
        .route("/sign-out", axum::routing::post(sign_out_handler))
        .with_state(state)
}

/// Authentication middleware that checks for a valid session cookie and sets CurrentUser extension.
/// This middleware only populates the CurrentUser extension and does not perform redirects.
pub async fn auth_user_middleware(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token_cookie) = jar.get(AUTH_COOKIE) {
        if let Some(current_user) = state.verifier.verify(token_cookie.value()) {
            request.extensions_mut().insert(current_user);
        }
    }

    next.run(request).await
}

/// Redirects anonymous visitors to the sign-in page.
/// This middleware should be applied after auth_user_middleware to check for CurrentUser extension.
pub async fn login_redirect_middleware(
    State(state): State<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    let is_authenticated = request.extensions().get::<CurrentUser>().is_some();

    if !is_authenticated {
        return Redirect::to(&state.sign_in_url).into_response();
    }

    next.run(request).await
}

#[derive(serde::Deserialize, Debug)]
pub struct CallbackQuery {
    pub token: String,
}

/// Receives the token the identity provider redirects back with, stores it in
/// the session cookie and sends the user to their tasks.
#[tracing::instrument(skip(state, jar, query))]
pub async fn callback_handler(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<(CookieJar, Redirect), AuthError> {
    let user = state
        .verifier
        .verify(&query.token)
        .ok_or(AuthError::InvalidToken)?;
    tracing::info!(user_id = %user.user_id, "Signed in");

    let cookie = Cookie::build((AUTH_COOKIE, query.token))
        .http_only(true)
        .secure(false) // Set to true in production with HTTPS
        .same_site(SameSite::Lax)
        .max_age(time::Duration::hours(24))
        .path("/")
        .build();

    Ok((jar.add(cookie), Redirect::to("/tasks")))
}

/// Drops the session cookie.
#[tracing::instrument(skip(jar))]
pub async fn sign_out_handler(jar: CookieJar) -> (CookieJar, Redirect) {
    let jar = jar.remove(Cookie::build(AUTH_COOKIE).path("/"));
    (jar, Redirect::to("/"))
}

/// Handles GET requests to display the sign-in page.
#[tracing::instrument]
pub async fn sign_in_page_handler(
    current_user: Option<Extension<CurrentUser>>,
) -> Result<Html<String>, AuthError> {
    let user_id = current_user.map(|Extension(user)| user.user_id);

    let template = SignInTemplate { user_id };
    template.render().map(Html).map_err(AuthError::from)
}

pub fn encode_jwt(user_id: &str, jwt_secret: &str) -> anyhow::Result<String> {
    let now = chrono::Utc::now();
    let expire = chrono::Duration::hours(24);
    let exp = (now + expire).timestamp() as usize;
    let iat = now.timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        exp,
        iat,
    };
    let jwt = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )?;
    Ok(jwt)
}

pub fn decode_jwt(token: &str, jwt_secret: &str) -> anyhow::Result<Claims> {
    let token_data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Span maker that keeps session tokens out of request logs.
/// The provider callback carries the token in its query string, so only the
/// path is recorded for it.
#[derive(Clone, Debug)]
pub struct FilteredMakeSpan;

impl<B> MakeSpan<B> for FilteredMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> Span {
        let uri = request.uri();
        let method = request.method();
        let matched_path = request
            .extensions()
            .get::<MatchedPath>()
            .map(MatchedPath::as_str);

        if uri.path() == "/auth/callback" {
            tracing::info_span!(
                "request",
                method = %method,
                path = %uri.path(),
                matched_path,
                sensitive_route = true,
            )
        } else {
            tracing::info_span!(
                "request",
                method = %method,
                uri = %uri,
                matched_path,
            )
        }
    }
}

#[derive(Template)]
#[template(path = "auth/sign_in.html")]
pub struct SignInTemplate {
    pub user_id: Option<String>,
}

#[derive(Template)]
#[template(path = "auth/invalid_token.html")]
pub struct InvalidTokenTemplate;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::middleware::from_fn_with_state;
    use mockall::predicate::eq;
    use tower::ServiceExt;

    fn auth_state(verifier: MockSessionVerifier) -> Arc<AuthState> {
        Arc::new(AuthState {
            verifier: Arc::new(verifier),
            sign_in_url: "/auth/sign-in".to_string(),
        })
    }

    fn protected_app(state: Arc<AuthState>) -> Router {
        // Layers are applied in reverse order (bottom to top)
        Router::new()
            .route(
                "/protected",
                axum::routing::get(|Extension(user): Extension<CurrentUser>| async move {
                    user.user_id
                }),
            )
            .layer(from_fn_with_state(state.clone(), login_redirect_middleware))
            .layer(from_fn_with_state(state, auth_user_middleware))
    }

    #[test]
    fn can_round_trip_a_session_token() {
        let token = encode_jwt("user_123", "secret").unwrap();

        let verifier = JwtSessionVerifier::new("secret");

        assert_eq!(verifier.verify(&token), Some(CurrentUser::new("user_123")));
    }

    #[test]
    fn can_reject_token_signed_with_another_secret() {
        let token = encode_jwt("user_123", "other_secret").unwrap();

        let verifier = JwtSessionVerifier::new("secret");

        assert_eq!(verifier.verify(&token), None);
    }

    #[tokio::test]
    async fn can_redirect_anonymous_requests_to_sign_in() {
        let mut verifier = MockSessionVerifier::new();
        verifier.expect_verify().never();
        let app = protected_app(auth_state(verifier));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get("location").unwrap(), "/auth/sign-in");
    }

    #[tokio::test]
    async fn can_pass_verified_user_to_handlers() {
        let mut verifier = MockSessionVerifier::new();
        verifier
            .expect_verify()
            .with(eq("good-token"))
            .times(1)
            .returning(|_| Some(CurrentUser::new("user_123")));
        let app = protected_app(auth_state(verifier));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("cookie", "auth_token=good-token")
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

    #[tokio::test]
    async fn can_redirect_when_cookie_does_not_verify() {
        let mut verifier = MockSessionVerifier::new();
        verifier.expect_verify().times(1).returning(|_| None);
        let app = protected_app(auth_state(verifier));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("cookie", "auth_token=stale-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn can_store_session_cookie_on_callback() {
        let mut verifier = MockSessionVerifier::new();
        verifier
            .expect_verify()
            .returning(|_| Some(CurrentUser::new("user_123")));
        let app = create_auth_router(auth_state(verifier));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/callback?token=provider-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get("location").unwrap(), "/tasks");
        let cookie_header = response
            .headers()
            .get("set-cookie")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(cookie_header.contains("auth_token=provider-token"));
        assert!(cookie_header.contains("HttpOnly"));
        assert!(cookie_header.contains("Path=/"));
    }

    #[tokio::test]
    async fn can_reject_callback_with_invalid_token() {
        let mut verifier = MockSessionVerifier::new();
        verifier.expect_verify().returning(|_| None);
        let app = create_auth_router(auth_state(verifier));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/callback?token=forged")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get("set-cookie").is_none());
    }

    #[tokio::test]
    async fn can_clear_session_cookie_on_sign_out() {
        let app = create_auth_router(auth_state(MockSessionVerifier::new()));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sign-out")
                    .header("cookie", "auth_token=whatever")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let cookie_header = response
            .headers()
            .get("set-cookie")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(cookie_header.starts_with("auth_token="));
        assert!(cookie_header.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn can_handle_template_error_with_internal_server_error() {
        let template_error = askama::Error::Custom("Simulated template rendering failure".into());

        let response = AuthError::Template(template_error).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
