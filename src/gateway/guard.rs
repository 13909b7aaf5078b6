//! Request-time credential guards.
//!
//! Two independent channels:
//! - bearer access token (`Authorization: Bearer ..`) for ordinary protected routes
//! - httpOnly refresh cookie for `/auth/refresh` and the perimeter gate
//!
//! Each guard is an axum middleware applied per route class with
//! `route_layer`, and each resolves its channel to a [`CredentialState`].

use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::warn;

use super::cookie::RefreshCookie;
use super::response::ApiError;
use super::AppState;
use crate::auth::token::extract_bearer;
use crate::auth::{AuthError, ClientMeta, User, VerifiedRefresh};

/// API paths that never need the refresh cookie, relative to the prefix.
/// A listed path also covers everything below it.
const PUBLIC_PATHS: [&str; 6] = [
    "/auth/register",
    "/auth/login",
    "/auth/refresh",
    "/auth/google",
    "/health",
    "/status",
];

/// Which API paths the perimeter gate covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerimeterScope {
    /// No perimeter gate.
    Off,
    /// Paths under `<prefix>/auth/`, where browsers actually send the cookie.
    #[default]
    AuthPrefix,
    /// Every path under the prefix.
    AllApi,
}

impl PerimeterScope {
    /// Whether `path` must carry the refresh cookie.
    pub fn gates(self, api_prefix: &str, path: &str) -> bool {
        let Some(rest) = path.strip_prefix(api_prefix) else {
            return false;
        };
        if !rest.is_empty() && !rest.starts_with('/') {
            return false;
        }
        if PUBLIC_PATHS
            .iter()
            .any(|p| rest == *p || rest.strip_prefix(p).is_some_and(|r| r.starts_with('/')))
        {
            return false;
        }
        match self {
            Self::Off => false,
            Self::AuthPrefix => rest.starts_with("/auth/"),
            Self::AllApi => true,
        }
    }
}

/// Outcome of inspecting one credential channel.
#[derive(Debug)]
pub enum CredentialState<T> {
    Missing,
    Invalid(AuthError),
    Valid(T),
}

/// Set by [`require_bearer`].
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

/// Set by [`require_refresh_cookie`].
#[derive(Debug, Clone)]
pub struct RefreshSession(pub VerifiedRefresh);

/// Set by [`optional_bearer`]; `None` when no valid bearer was presented.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

/// Client IP. Forwarding headers are only consulted when `trust_forwarded`
/// is set; the socket peer is the fallback.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> Option<String> {
    if trust_forwarded {
        for header_name in ["X-Forwarded-For", "X-Real-IP"] {
            if let Some(value) = headers.get(header_name).and_then(|v| v.to_str().ok()) {
                let first = value.split(',').next().unwrap_or("").trim();
                if !first.is_empty() {
                    return Some(first.to_owned());
                }
            }
        }
    }
    peer.map(|addr| addr.ip().to_string())
}

impl FromRequestParts<AppState> for ClientMeta {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientMeta {
            ip: client_ip(&parts.headers, peer, state.trust_forwarded),
            user_agent: parts
                .headers
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
        })
    }
}

async fn bearer_state(state: &AppState, headers: &HeaderMap) -> CredentialState<User> {
    let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
    else {
        return CredentialState::Missing;
    };
    match state.service.authenticate_access(token).await {
        Ok(user) => CredentialState::Valid(user),
        Err(err) => CredentialState::Invalid(err),
    }
}

async fn refresh_state(
    state: &AppState,
    headers: &HeaderMap,
    meta: &ClientMeta,
) -> CredentialState<VerifiedRefresh> {
    let Some(raw) = RefreshCookie::extract(headers) else {
        return CredentialState::Missing;
    };
    match state.service.authenticate_refresh(&raw, meta).await {
        Ok(verified) => CredentialState::Valid(verified),
        Err(err) => CredentialState::Invalid(err),
    }
}

/// 401 `TOKEN_MISSING` / `TOKEN_INVALID` / `USER_NOT_FOUND`, otherwise
/// inserts [`AuthenticatedUser`].
pub async fn require_bearer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match bearer_state(&state, request.headers()).await {
        CredentialState::Valid(user) => {
            request.extensions_mut().insert(AuthenticatedUser(user));
            next.run(request).await
        }
        CredentialState::Missing => state.reject(AuthError::TokenMissing),
        CredentialState::Invalid(err) => state.reject(err),
    }
}

/// 401 `REFRESH_TOKEN_MISSING` without a cookie. Verification failures and
/// ledger misses clear the cookie. Otherwise inserts [`RefreshSession`].
pub async fn require_refresh_cookie(
    State(state): State<AppState>,
    meta: ClientMeta,
    mut request: Request,
    next: Next,
) -> Response {
    match refresh_state(&state, request.headers(), &meta).await {
        CredentialState::Valid(verified) => {
            request.extensions_mut().insert(RefreshSession(verified));
            next.run(request).await
        }
        CredentialState::Missing => state.reject(AuthError::RefreshTokenMissing),
        CredentialState::Invalid(err) => state.reject(err),
    }
}

/// Never rejects; inserts [`MaybeUser`].
pub async fn optional_bearer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let user = match bearer_state(&state, request.headers()).await {
        CredentialState::Valid(user) => Some(user),
        CredentialState::Missing | CredentialState::Invalid(_) => None,
    };
    request.extensions_mut().insert(MaybeUser(user));
    next.run(request).await
}

/// Coarse check for the cookie's presence only. Gated paths without it get
/// a 404 so the response does not reveal that the route exists. Validity is
/// left to the route's own guard.
pub async fn perimeter_gate(
    State(state): State<AppState>,
    meta: ClientMeta,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if state.perimeter.gates(&state.api_prefix, path)
        && RefreshCookie::extract(request.headers()).is_none()
    {
        warn!(
            path,
            ip = meta.ip.as_deref().unwrap_or("unknown"),
            "SECURITY: API access denied, refresh cookie missing"
        );
        return ApiError::resource_not_found(path).into_response();
    }
    next.run(request).await
}
