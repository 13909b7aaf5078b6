//! HTTP handlers. Guards run before these; handlers only see resolved
//! credentials through request extensions.

use axum::extract::rejection::JsonRejection;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::cookie::RefreshCookie;
use super::guard::{AuthenticatedUser, MaybeUser, RefreshSession};
use super::response::{success, ApiError, SessionView, UserView};
use super::AppState;
use crate::auth::identity::DEMO_EMAIL;
use crate::auth::{ClientMeta, LoginCredentials, Registration, SessionGrant};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|e| ApiError::bad_body(e.body_text()))
}

/// `{user, accessToken, expiresIn}` plus the refresh cookie.
fn session_response(
    state: &AppState,
    status: StatusCode,
    message: &str,
    grant: &SessionGrant,
    federated: Option<&str>,
) -> Response {
    let mut data = json!({
        "user": UserView::from(&grant.user),
        "accessToken": grant.access_token,
        "expiresIn": grant.expires_in,
    });
    if let Some(provider) = federated {
        data["provider"] = json!(provider);
        data["isNewUser"] = json!(grant.is_new_user);
    }
    let mut response = success(status, message, Some(data));
    state.cookie.attach_issue(&mut response, &grant.refresh_token);
    response
}

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    meta: ClientMeta,
    body: Result<Json<Registration>, JsonRejection>,
) -> Result<Response, ApiError> {
    let input = parse_body(body)?;
    let grant = state
        .service
        .register(input, &meta)
        .await
        .map_err(|e| state.api_error(e))?;
    Ok(session_response(
        &state,
        StatusCode::CREATED,
        "User registered successfully",
        &grant,
        None,
    ))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    meta: ClientMeta,
    body: Result<Json<LoginCredentials>, JsonRejection>,
) -> Result<Response, ApiError> {
    let input = parse_body(body)?;
    let grant = state
        .service
        .login(input, &meta)
        .await
        .map_err(|e| state.api_error(e))?;
    Ok(session_response(
        &state,
        StatusCode::OK,
        "Login successful",
        &grant,
        None,
    ))
}

/// POST /auth/refresh. The new refresh token only travels in the cookie.
pub async fn refresh(
    State(state): State<AppState>,
    meta: ClientMeta,
    Extension(RefreshSession(verified)): Extension<RefreshSession>,
) -> Result<Response, ApiError> {
    let grant = state
        .service
        .refresh(&verified, &meta)
        .await
        .map_err(|e| state.api_error(e))?;

    let mut response = success(
        StatusCode::OK,
        "Token refreshed successfully",
        Some(json!({
            "accessToken": grant.access_token,
            "expiresIn": grant.expires_in,
        })),
    );
    state.cookie.attach_issue(&mut response, &grant.refresh_token);
    Ok(response)
}

/// POST /auth/logout. Idempotent; the cookie is always cleared.
pub async fn logout(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let presented = RefreshCookie::extract(&headers);
    state
        .service
        .logout(&user, presented.as_deref())
        .await
        .map_err(|e| state.api_error(e))?;

    let mut response = success(StatusCode::OK, "Logout successful", None);
    state.cookie.attach_clear(&mut response);
    Ok(response)
}

/// POST /auth/logout-all
pub async fn logout_all(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let revoked = state
        .service
        .logout_all(&user)
        .await
        .map_err(|e| state.api_error(e))?;

    let mut response = success(
        StatusCode::OK,
        "Logged out from all devices successfully",
        Some(json!({ "revoked": revoked })),
    );
    state.cookie.attach_clear(&mut response);
    Ok(response)
}

/// GET /user/me
pub async fn me(Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>) -> Response {
    success(
        StatusCode::OK,
        "User profile retrieved successfully",
        Some(json!({ "user": UserView::from(&user) })),
    )
}

/// GET /user/sessions: the caller's live refresh tokens.
pub async fn sessions(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let records = state
        .service
        .sessions(&user)
        .await
        .map_err(|e| state.api_error(e))?;
    let sessions: Vec<SessionView<'_>> = records.iter().map(SessionView::from).collect();
    Ok(success(
        StatusCode::OK,
        "Active sessions retrieved successfully",
        Some(json!({ "sessions": sessions })),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct DemoLoginBody {
    pub email: Option<String>,
}

/// POST /auth/google/demo
pub async fn demo_login(
    State(state): State<AppState>,
    meta: ClientMeta,
    body: Result<Json<DemoLoginBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let input = parse_body(body)?;
    let grant = state
        .service
        .federated_login(input.email.as_deref(), &meta)
        .await
        .map_err(|e| state.api_error(e))?;

    let provider = state.service.identity_provider().unwrap_or("demo");
    let message = if grant.is_new_user {
        "Account created and logged in via Google"
    } else {
        "Logged in via Google"
    };
    Ok(session_response(
        &state,
        StatusCode::OK,
        message,
        &grant,
        Some(provider),
    ))
}

fn demo_login_path(state: &AppState) -> String {
    format!("POST {}/auth/google/demo", state.api_prefix)
}

/// GET /auth/google: usage instructions for the mocked provider.
pub async fn demo_info(State(state): State<AppState>) -> Response {
    Json(json!({
        "success": true,
        "message": "Demo Google OAuth - Use the login endpoint with email parameter",
        "demo": true,
        "instructions": {
            "demoLogin": format!("{} with {{ \"email\": \"{DEMO_EMAIL}\" }}", demo_login_path(&state)),
            "testLogin": format!("{} with {{ \"email\": \"test@example.com\" }}", demo_login_path(&state)),
            "note": "This simulates Google OAuth flow without real Google integration",
        },
    }))
    .into_response()
}

/// GET /auth/google/status
pub async fn demo_status(State(state): State<AppState>) -> Response {
    Json(json!({
        "success": true,
        "message": "Google OAuth Demo Configuration",
        "demo": true,
        "configuration": {
            "provider": state.service.identity_provider(),
            "demoUser": DEMO_EMAIL,
            "warning": "Demo identity provider. Never enable in production.",
        },
        "instructions": {
            "endpoint": demo_login_path(&state),
            "body": format!("{{ \"email\": \"{DEMO_EMAIL}\" }}"),
        },
    }))
    .into_response()
}

/// GET /auth/google/callback: no real provider ever calls back.
pub async fn demo_callback(State(state): State<AppState>) -> Response {
    Json(json!({
        "success": false,
        "error": "Demo mode only. No real keys needed!",
        "message": format!("This is a demo callback. Use {} instead.", demo_login_path(&state)),
        "demo": true,
    }))
    .into_response()
}

/// GET /health and GET <prefix>/health
pub async fn health(State(state): State<AppState>) -> Response {
    let pool = state.pool.clone();
    let database = match tokio::task::spawn_blocking(move || pool.health_check()).await {
        Ok(Ok(())) => "ok",
        Ok(Err(e)) => {
            tracing::warn!("Database health check failed: {e}");
            "unavailable"
        }
        Err(e) => {
            tracing::warn!("Database health check task failed: {e}");
            "unavailable"
        }
    };
    Json(json!({
        "success": true,
        "message": "AuthKit API is running",
        "timestamp": Utc::now(),
        "version": VERSION,
        "database": database,
    }))
    .into_response()
}

/// GET <prefix>/status: personalises with `authenticated` when a valid
/// bearer is present, never requires one.
pub async fn status(
    State(state): State<AppState>,
    Extension(MaybeUser(user)): Extension<MaybeUser>,
) -> Response {
    Json(json!({
        "success": true,
        "message": "AuthKit API is operational",
        "timestamp": Utc::now(),
        "version": VERSION,
        "environment": state.environment.as_str(),
        "authenticated": user.is_some(),
    }))
    .into_response()
}

/// Unmatched routes: `ENDPOINT_NOT_FOUND` under the API prefix,
/// `RESOURCE_NOT_FOUND` elsewhere.
pub async fn not_found(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
) -> ApiError {
    let path = uri.path();
    let under_api = path
        .strip_prefix(&*state.api_prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'));
    if under_api {
        ApiError::endpoint_not_found(method.as_str(), path)
    } else {
        ApiError::resource_not_found(path)
    }
}
