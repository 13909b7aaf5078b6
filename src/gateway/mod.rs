//! Axum-based HTTP gateway for the auth API.
//!
//! Routes are grouped by guard class and each group carries its guard as a
//! `route_layer`. Blanket concerns (perimeter gate, rate limit, CORS, body
//! limit, timeout, security headers) wrap the whole router.

pub mod cookie;
pub mod guard;
pub mod handlers;
pub mod rate_limit;
pub mod response;

use crate::auth::{
    AuthError, AuthService, DemoIdentityResolver, PasswordHasher, SqliteAuthStore, TokenCodec,
};
use crate::config::{Config, Environment};
use crate::db::DatabasePool;
use anyhow::{bail, Context, Result};
use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;

use self::cookie::RefreshCookie;
use self::guard::PerimeterScope;
use self::rate_limit::RateLimiter;
use self::response::ApiError;

/// Maximum request body size (64KB). Auth payloads are tiny.
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s).
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Sent on every response unless a handler set its own.
pub const CSP_POLICY: &str =
    "default-src 'self'; style-src 'self' 'unsafe-inline'; script-src 'self'; img-src 'self' data: https:";
/// Production only (180 days).
pub const HSTS_POLICY: &str = "max-age=15552000; includeSubDomains";

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AuthService>,
    pub cookie: Arc<RefreshCookie>,
    pub rate_limiter: Arc<RateLimiter>,
    pub pool: DatabasePool,
    pub environment: Environment,
    pub api_prefix: Arc<str>,
    pub perimeter: PerimeterScope,
    /// Honour `X-Forwarded-For` / `X-Real-IP` when resolving the client IP.
    pub trust_forwarded: bool,
    pub cors_origin: HeaderValue,
}

impl AppState {
    /// Wire the store, codec and service from `config` on top of `pool`.
    pub fn from_config(config: &Config, pool: DatabasePool) -> Result<Self> {
        let origin = config.server.cors_origin.trim();
        if origin == "*" {
            bail!("server.cors_origin must name a single origin; credentials are allowed");
        }
        let cors_origin = HeaderValue::from_str(origin)
            .with_context(|| format!("Invalid server.cors_origin: {origin}"))?;

        let store = Arc::new(SqliteAuthStore::new(
            pool.clone(),
            PasswordHasher::new(config.credentials.hash_rounds),
        ));
        let codec = TokenCodec::new(config.token_settings())?;
        let mut service = AuthService::new(store.clone(), store, codec);
        if config.demo_oauth_enabled() {
            service = service.with_identity(Arc::new(DemoIdentityResolver::new()));
        }

        let cookie = RefreshCookie::new(
            &config.server.api_prefix,
            config.environment.is_production(),
            config.cookie.domain.clone(),
            service.refresh_lifetime_secs(),
        );
        let rate_limiter = RateLimiter::new(
            config.rate_limit.max_requests,
            Duration::from_millis(config.rate_limit.window_ms.max(1)),
        );

        Ok(Self {
            service: Arc::new(service),
            cookie: Arc::new(cookie),
            rate_limiter: Arc::new(rate_limiter),
            pool,
            environment: config.environment,
            api_prefix: Arc::from(config.server.api_prefix.as_str()),
            perimeter: config.server.perimeter,
            trust_forwarded: config.server.trust_forwarded_headers,
            cors_origin,
        })
    }

    /// Boundary mapping for a use-case failure, clearing the refresh cookie
    /// where the failure invalidates it.
    pub fn api_error(&self, err: AuthError) -> ApiError {
        let clear = err.clears_refresh_cookie();
        let api = ApiError::from_auth(err, !self.environment.is_production());
        if clear {
            api.with_cookie(self.cookie.clear())
        } else {
            api
        }
    }

    pub fn reject(&self, err: AuthError) -> Response {
        self.api_error(err).into_response()
    }
}

/// Full router with every middleware applied.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/health", get(handlers::health));

    let refresh = Router::new()
        .route("/auth/refresh", post(handlers::refresh))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            guard::require_refresh_cookie,
        ));

    let bearer = Router::new()
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/logout-all", post(handlers::logout_all))
        .route("/user/me", get(handlers::me))
        .route("/user/sessions", get(handlers::sessions))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            guard::require_bearer,
        ));

    let optional = Router::new()
        .route("/status", get(handlers::status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            guard::optional_bearer,
        ));

    let mut api = public.merge(refresh).merge(bearer).merge(optional);

    if let Some(provider) = state.service.identity_provider() {
        tracing::warn!(provider, "Demo identity provider routes are mounted");
        api = api
            .route("/auth/google", get(handlers::demo_info))
            .route("/auth/google/demo", post(handlers::demo_login))
            .route("/auth/google/status", get(handlers::demo_status))
            .route("/auth/google/callback", get(handlers::demo_callback));
    }

    let cors = CorsLayer::new()
        .allow_origin(state.cors_origin.clone())
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .nest(&state.api_prefix, api)
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            guard::perimeter_gate,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit,
        ))
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CSP_POLICY),
        ));

    // Production is served over TLS.
    if state.environment.is_production() {
        router = router.layer(SetResponseHeaderLayer::if_not_present(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static(HSTS_POLICY),
        ));
    }

    router.with_state(state)
}

/// Periodically drop expired and revoked ledger rows.
fn spawn_sweeper(service: Arc<AuthService>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // First tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = service.sweep().await {
                tracing::warn!("Refresh token sweep failed: {e}");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}

/// Run the HTTP gateway until Ctrl-C.
pub async fn run_gateway(config: Config) -> Result<()> {
    config.validate()?;
    for warning in config.warnings() {
        tracing::warn!("{warning}");
    }

    let db_path = config.database_path();
    let pool = DatabasePool::open(&db_path, config.pool_config())
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    tracing::info!("Database ready at {}", db_path.display());

    let state = AppState::from_config(&config, pool.clone())?;
    if state.rate_limiter.is_enabled() {
        tracing::info!(
            max_requests = config.rate_limit.max_requests,
            window_ms = config.rate_limit.window_ms,
            "Rate limiting enabled"
        );
    } else {
        tracing::warn!("Rate limiting disabled (rate_limit.max_requests = 0)");
    }
    if state.trust_forwarded {
        tracing::info!("Client IPs taken from X-Forwarded-For / X-Real-IP");
    }

    let sweeper = (config.database.sweep_interval_secs > 0).then(|| {
        spawn_sweeper(
            state.service.clone(),
            Duration::from_secs(config.database.sweep_interval_secs),
        )
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;

    tracing::info!(
        environment = config.environment.as_str(),
        "AuthKit listening on http://{local}{}",
        config.server.api_prefix
    );

    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    pool.close();
    tracing::info!("AuthKit stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE};
    use axum::http::{HeaderMap, Request};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        pool: DatabasePool,
        _tmp: TempDir,
    }

    fn test_config(tmp: &TempDir) -> Config {
        let mut config = Config::default();
        config.environment = Environment::Test;
        config.tokens.access_secret = "access-secret".into();
        config.tokens.refresh_secret = "refresh-secret".into();
        config.credentials.hash_rounds = 1_000;
        config.database.path = Some(tmp.path().join("gateway.db"));
        config
    }

    fn app_with(tweak: impl FnOnce(&mut Config)) -> TestApp {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(&tmp);
        tweak(&mut config);
        let pool = DatabasePool::open(&config.database_path(), config.pool_config()).unwrap();
        let state = AppState::from_config(&config, pool.clone()).unwrap();
        TestApp {
            router: build_router(state),
            pool,
            _tmp: tmp,
        }
    }

    fn app() -> TestApp {
        app_with(|_| {})
    }

    impl TestApp {
        async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<String>, Value) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let cookies = response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .map(|v| v.to_str().unwrap().to_owned())
                .collect();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, cookies, body)
        }

        async fn headers(&self, request: Request<Body>) -> (StatusCode, HeaderMap) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            (response.status(), response.headers().clone())
        }

        async fn register(&self, email: &str) -> (String, String) {
            let (status, cookies, body) = self
                .send(post_json(
                    "/api/auth/register",
                    json!({
                        "email": email,
                        "password": "Abcdef1!",
                        "firstName": "Alice",
                        "lastName": "Smith",
                    }),
                ))
                .await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
            let access = body["data"]["accessToken"].as_str().unwrap().to_owned();
            (access, refresh_from(&cookies).unwrap())
        }
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn with_bearer(method: Method, uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    fn with_cookie(uri: &str, refresh: &str) -> Request<Body> {
        Request::post(uri)
            .header(COOKIE, format!("refreshToken={refresh}"))
            .body(Body::empty())
            .unwrap()
    }

    /// Token value from a `refreshToken=..` Set-Cookie, `None` for a clear.
    fn refresh_from(cookies: &[String]) -> Option<String> {
        cookies.iter().find_map(|c| {
            let value = c.strip_prefix("refreshToken=")?.split(';').next()?;
            (!value.is_empty()).then(|| value.to_owned())
        })
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn from_peer(uri: &str, peer: &str, forwarded_for: &str) -> Request<Body> {
        let mut request = Request::get(uri)
            .header("X-Forwarded-For", forwarded_for)
            .body(Body::empty())
            .unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    fn is_clear(cookies: &[String]) -> bool {
        cookies
            .iter()
            .any(|c| c.starts_with("refreshToken=;") && c.contains("Max-Age=0"))
    }

    #[test]
    fn security_body_limit_is_64kb() {
        assert_eq!(MAX_BODY_SIZE, 65_536);
    }

    #[test]
    fn app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn wildcard_cors_origin_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(&tmp);
        config.server.cors_origin = "*".into();
        let pool = DatabasePool::open(&config.database_path(), config.pool_config()).unwrap();
        assert!(AppState::from_config(&config, pool).is_err());
    }

    #[tokio::test]
    async fn register_returns_access_token_and_cookie_only() {
        let app = app();
        let (status, cookies, body) = app
            .send(post_json(
                "/api/auth/register",
                json!({"email": "alice@example.com", "password": "Abcdef1!", "firstName": "Alice"}),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["user"]["email"], "alice@example.com");
        assert_eq!(body["data"]["expiresIn"], 900);
        assert!(body["data"]["user"].get("password").is_none());

        let refresh = refresh_from(&cookies).unwrap();
        assert!(!body.to_string().contains(&refresh));
        assert!(cookies[0].contains("HttpOnly"));
        assert!(cookies[0].contains("Path=/api/auth"));
        assert!(!cookies[0].contains("Secure"));

        let (status, _, body) = app
            .send(post_json(
                "/api/auth/register",
                json!({"email": "alice@example.com", "password": "Abcdef1!"}),
            ))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "USER_EXISTS");
    }

    #[tokio::test]
    async fn register_validation_and_bad_body() {
        let app = app();
        let (status, cookies, body) = app
            .send(post_json("/api/auth/register", json!({"email": "nope", "password": "short"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert!(body["details"].as_array().unwrap().len() >= 2);
        assert!(cookies.is_empty());

        let request = Request::post("/api/auth/register")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _, body) = app.send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let app = app();
        app.register("alice@example.com").await;

        let (s1, _, wrong_password) = app
            .send(post_json(
                "/api/auth/login",
                json!({"email": "alice@example.com", "password": "Wrong123!"}),
            ))
            .await;
        let (s2, _, unknown_user) = app
            .send(post_json(
                "/api/auth/login",
                json!({"email": "bob@example.com", "password": "Abcdef1!"}),
            ))
            .await;
        assert_eq!(s1, StatusCode::UNAUTHORIZED);
        assert_eq!(s2, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_password, unknown_user);
        assert_eq!(wrong_password["code"], "INVALID_CREDENTIALS");

        let (status, cookies, body) = app
            .send(post_json(
                "/api/auth/login",
                json!({"email": "alice@example.com", "password": "Abcdef1!"}),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["accessToken"].is_string());
        assert!(refresh_from(&cookies).is_some());
    }

    #[tokio::test]
    async fn refresh_without_cookie_is_missing() {
        let app = app();
        let request = Request::post("/api/auth/refresh").body(Body::empty()).unwrap();
        let (status, cookies, body) = app.send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "REFRESH_TOKEN_MISSING");
        assert!(cookies.is_empty());
    }

    #[tokio::test]
    async fn garbage_refresh_cookie_is_treated_as_theft() {
        let app = app();
        let (status, cookies, body) = app.send(with_cookie("/api/auth/refresh", "garbage")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "XSS_ATTACK_DETECTED");
        assert!(is_clear(&cookies));
    }

    #[tokio::test]
    async fn access_token_in_refresh_cookie_is_rejected() {
        let app = app();
        let (access, _) = app.register("alice@example.com").await;
        let (status, _, body) = app.send(with_cookie("/api/auth/refresh", &access)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "XSS_ATTACK_DETECTED");
    }

    #[tokio::test]
    async fn refresh_rotates_and_replay_fails() {
        let app = app();
        let (_, first) = app.register("alice@example.com").await;

        let (status, cookies, body) = app.send(with_cookie("/api/auth/refresh", &first)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(body["data"]["accessToken"].is_string());
        assert!(body["data"].get("refreshToken").is_none());
        let second = refresh_from(&cookies).unwrap();
        assert_ne!(first, second);

        let (status, cookies, body) = app.send(with_cookie("/api/auth/refresh", &first)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "REFRESH_TOKEN_NOT_FOUND");
        assert!(is_clear(&cookies));

        let (status, _, _) = app.send(with_cookie("/api/auth/refresh", &second)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn me_requires_bearer() {
        let app = app();
        let (access, refresh) = app.register("alice@example.com").await;

        let (status, _, body) = app
            .send(Request::get("/api/user/me").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "TOKEN_MISSING");

        let (status, _, body) = app.send(with_bearer(Method::GET, "/api/user/me", &refresh)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "TOKEN_INVALID");

        let (status, _, body) = app.send(with_bearer(Method::GET, "/api/user/me", &access)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["user"]["email"], "alice@example.com");
        assert_eq!(body["data"]["user"]["firstName"], "Alice");
    }

    #[tokio::test]
    async fn sessions_lists_live_tokens() {
        let app = app();
        let (access, _) = app.register("alice@example.com").await;
        app.send(post_json(
            "/api/auth/login",
            json!({"email": "alice@example.com", "password": "Abcdef1!"}),
        ))
        .await;

        let (status, _, body) = app
            .send(with_bearer(Method::GET, "/api/user/sessions", &access))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["sessions"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn logout_revokes_presented_token_and_clears_cookie() {
        let app = app();
        let (access, refresh) = app.register("alice@example.com").await;

        let request = Request::post("/api/auth/logout")
            .header(AUTHORIZATION, format!("Bearer {access}"))
            .header(COOKIE, format!("refreshToken={refresh}"))
            .body(Body::empty())
            .unwrap();
        let (status, cookies, body) = app.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Logout successful");
        assert!(is_clear(&cookies));

        let (_, _, body) = app.send(with_cookie("/api/auth/refresh", &refresh)).await;
        assert_eq!(body["code"], "REFRESH_TOKEN_NOT_FOUND");
    }

    #[tokio::test]
    async fn logout_all_revokes_every_session() {
        let app = app();
        let (access, first) = app.register("alice@example.com").await;
        let (_, cookies, _) = app
            .send(post_json(
                "/api/auth/login",
                json!({"email": "alice@example.com", "password": "Abcdef1!"}),
            ))
            .await;
        let second = refresh_from(&cookies).unwrap();

        let request = Request::post("/api/auth/logout-all")
            .header(AUTHORIZATION, format!("Bearer {access}"))
            .header(COOKIE, format!("refreshToken={first}"))
            .body(Body::empty())
            .unwrap();
        let (status, cookies, body) = app.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["revoked"], 2);
        assert!(is_clear(&cookies));

        for token in [first, second] {
            let (_, _, body) = app.send(with_cookie("/api/auth/refresh", &token)).await;
            assert_eq!(body["code"], "REFRESH_TOKEN_NOT_FOUND");
        }
    }

    #[tokio::test]
    async fn perimeter_hides_cookie_paths_without_cookie() {
        let app = app();
        let (access, _) = app.register("alice@example.com").await;

        let (status, _, body) = app
            .send(with_bearer(Method::POST, "/api/auth/logout", &access))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "RESOURCE_NOT_FOUND");

        // Outside the cookie path the bearer alone is enough.
        let (status, _, _) = app.send(with_bearer(Method::GET, "/api/user/me", &access)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn perimeter_all_api_gates_user_routes() {
        let app = app_with(|c| c.server.perimeter = PerimeterScope::AllApi);
        let (access, refresh) = app.register("alice@example.com").await;

        let (status, _, body) = app.send(with_bearer(Method::GET, "/api/user/me", &access)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "RESOURCE_NOT_FOUND");

        let request = Request::get("/api/user/me")
            .header(AUTHORIZATION, format!("Bearer {access}"))
            .header(COOKIE, format!("refreshToken={refresh}"))
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = app.send(request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn logout_without_cookie_is_idempotent_when_perimeter_off() {
        let app = app_with(|c| c.server.perimeter = PerimeterScope::Off);
        let (access, _) = app.register("alice@example.com").await;
        for _ in 0..2 {
            let (status, cookies, _) = app
                .send(with_bearer(Method::POST, "/api/auth/logout", &access))
                .await;
            assert_eq!(status, StatusCode::OK);
            assert!(is_clear(&cookies));
        }
    }

    #[tokio::test]
    async fn unknown_routes_are_404() {
        let app = app();
        let (status, _, body) = app
            .send(Request::get("/api/nothing-here").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "ENDPOINT_NOT_FOUND");
        assert_eq!(body["message"], "The endpoint GET /api/nothing-here does not exist");

        let (status, _, body) = app
            .send(Request::get("/favicon.ico").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "RESOURCE_NOT_FOUND");
    }

    #[tokio::test]
    async fn demo_login_creates_then_reuses_account() {
        let app = app();
        let (status, _, body) = app
            .send(post_json("/api/auth/google/demo", json!({})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let (status, cookies, body) = app
            .send(post_json("/api/auth/google/demo", json!({"email": "demo@authkit.com"})))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["user"]["email"], "demo@authkit.com");
        assert_eq!(body["data"]["provider"], "google");
        assert_eq!(body["data"]["isNewUser"], true);
        assert!(refresh_from(&cookies).is_some());

        let (_, _, body) = app
            .send(post_json("/api/auth/google/demo", json!({"email": "demo@authkit.com"})))
            .await;
        assert_eq!(body["data"]["isNewUser"], false);

        let (status, _, body) = app
            .send(Request::get("/api/auth/google/status").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["demo"], true);
    }

    #[tokio::test]
    async fn demo_routes_absent_in_production() {
        let app = app_with(|c| c.environment = Environment::Production);
        let (status, _, body) = app
            .send(post_json("/api/auth/google/demo", json!({"email": "demo@authkit.com"})))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "ENDPOINT_NOT_FOUND");
    }

    #[tokio::test]
    async fn production_cookie_is_secure() {
        let app = app_with(|c| c.environment = Environment::Production);
        let (status, cookies, _) = app
            .send(post_json(
                "/api/auth/register",
                json!({"email": "alice@example.com", "password": "Abcdef1!"}),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(cookies[0].contains("; Secure"));
    }

    #[tokio::test]
    async fn rate_limit_returns_429() {
        let app = app_with(|c| c.rate_limit.max_requests = 2);
        for _ in 0..2 {
            let (status, _, _) = app
                .send(Request::get("/health").body(Body::empty()).unwrap())
                .await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, _, body) = app
            .send(Request::get("/health").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
    }

    #[tokio::test]
    async fn health_reports_database() {
        let app = app();
        for uri in ["/health", "/api/health"] {
            let (status, _, body) = app.send(Request::get(uri).body(Body::empty()).unwrap()).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);
            assert_eq!(body["database"], "ok");
            assert_eq!(body["message"], "AuthKit API is running");
        }
    }

    #[tokio::test]
    async fn status_reflects_optional_bearer() {
        let app = app();
        let (access, _) = app.register("alice@example.com").await;

        let (status, _, body) = app
            .send(Request::get("/api/status").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["authenticated"], false);
        assert_eq!(body["environment"], "test");

        let (_, _, body) = app.send(with_bearer(Method::GET, "/api/status", &access)).await;
        assert_eq!(body["authenticated"], true);

        let (status, _, body) = app
            .send(with_bearer(Method::GET, "/api/status", "not-a-token"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["authenticated"], false);
    }

    #[tokio::test]
    async fn deactivated_user_bearer_is_user_not_found() {
        let app = app();
        let (access, _) = app.register("alice@example.com").await;
        app.pool
            .get()
            .unwrap()
            .execute(
                "UPDATE users SET is_active = 0 WHERE email = ?1",
                ["alice@example.com"],
            )
            .unwrap();

        let (status, _, body) = app.send(with_bearer(Method::GET, "/api/user/me", &access)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "USER_NOT_FOUND");
    }

    #[tokio::test]
    async fn padded_bearer_is_token_invalid() {
        let app = app();
        let (access, _) = app.register("alice@example.com").await;
        let request = Request::get("/api/user/me")
            .header(AUTHORIZATION, format!("Bearer  {access}"))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = app.send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "TOKEN_INVALID");
    }

    #[tokio::test]
    async fn security_headers_on_every_response() {
        let app = app();
        for uri in ["/health", "/api/nothing-here"] {
            let (_, headers) = app.headers(get_request(uri)).await;
            assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
            assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
            let csp = headers[header::CONTENT_SECURITY_POLICY].to_str().unwrap();
            assert!(csp.starts_with("default-src 'self'"));
            assert!(headers.get(header::STRICT_TRANSPORT_SECURITY).is_none());
        }

        let app = app_with(|c| c.environment = Environment::Production);
        let (status, headers) = app.headers(get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::STRICT_TRANSPORT_SECURITY], HSTS_POLICY);
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
    }

    #[tokio::test]
    async fn rate_limit_headers_count_down() {
        let app = app_with(|c| c.rate_limit.max_requests = 2);
        let (_, headers) = app.headers(get_request("/health")).await;
        assert_eq!(headers["ratelimit-limit"], "2");
        assert_eq!(headers["ratelimit-remaining"], "1");
        let reset: u64 = headers["ratelimit-reset"].to_str().unwrap().parse().unwrap();
        assert!(reset > 0 && reset <= 900);
        assert!(headers.get(header::RETRY_AFTER).is_none());

        app.headers(get_request("/health")).await;
        let (status, headers) = app.headers(get_request("/health")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(headers["ratelimit-remaining"], "0");
        assert!(headers.get(header::RETRY_AFTER).is_some());
    }

    #[tokio::test]
    async fn rate_limit_disabled_sends_no_quota_headers() {
        let app = app_with(|c| c.rate_limit.max_requests = 0);
        let (status, headers) = app.headers(get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get("ratelimit-limit").is_none());
    }

    #[tokio::test]
    async fn forwarded_for_is_ignored_unless_trusted() {
        let app = app_with(|c| c.rate_limit.max_requests = 1);
        let (status, _) = app.headers(from_peer("/health", "10.0.0.1:4000", "1.1.1.1")).await;
        assert_eq!(status, StatusCode::OK);
        // Same socket peer, new spoofed header: still the same bucket.
        let (status, _) = app.headers(from_peer("/health", "10.0.0.1:4001", "2.2.2.2")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        // A different peer has its own bucket.
        let (status, _) = app.headers(from_peer("/health", "10.0.0.2:4000", "1.1.1.1")).await;
        assert_eq!(status, StatusCode::OK);

        let app = app_with(|c| {
            c.rate_limit.max_requests = 1;
            c.server.trust_forwarded_headers = true;
        });
        for forwarded in ["1.1.1.1", "2.2.2.2"] {
            let (status, _) = app.headers(from_peer("/health", "10.0.0.1:4000", forwarded)).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, _) = app.headers(from_peer("/health", "10.0.0.9:4000", "1.1.1.1")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }
}
