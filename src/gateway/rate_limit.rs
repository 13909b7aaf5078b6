//! Blanket per-client rate limiting.
//!
//! Sliding window keyed by client IP. Every limited response carries
//! `RateLimit-Limit`, `RateLimit-Remaining` and `RateLimit-Reset` (seconds);
//! rejections add `Retry-After`. Stale keys are swept at most once per
//! `SWEEP_INTERVAL` so the map does not grow with every address ever seen.

use axum::extract::{Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::response::ApiError;
use super::AppState;
use crate::auth::ClientMeta;

/// How often the limiter sweeps stale keys from its map.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

static RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
static RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
static RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Outcome of one limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Until the oldest counted request leaves the window.
    pub reset: Duration,
}

impl Quota {
    fn reset_secs(&self) -> u64 {
        let secs = self.reset.as_secs();
        if self.reset.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    fn write_headers(&self, headers: &mut HeaderMap) {
        let reset = self.reset_secs();
        headers.insert(RATELIMIT_LIMIT.clone(), HeaderValue::from(self.limit));
        headers.insert(RATELIMIT_REMAINING.clone(), HeaderValue::from(self.remaining));
        headers.insert(RATELIMIT_RESET.clone(), HeaderValue::from(reset));
        if !self.allowed {
            headers.insert(RETRY_AFTER, HeaderValue::from(reset));
        }
    }
}

struct Buckets {
    hits: HashMap<String, Vec<Instant>>,
    last_sweep: Instant,
}

pub struct RateLimiter {
    limit_per_window: u32,
    window: Duration,
    sweep_interval: Duration,
    buckets: Mutex<Buckets>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit_per_window", &self.limit_per_window)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// `limit_per_window == 0` disables limiting.
    pub fn new(limit_per_window: u32, window: Duration) -> Self {
        Self {
            limit_per_window,
            window,
            sweep_interval: SWEEP_INTERVAL,
            buckets: Mutex::new(Buckets {
                hits: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limit_per_window > 0
    }

    /// Count one request for `key`. `None` when limiting is disabled.
    pub fn check(&self, key: &str) -> Option<Quota> {
        if !self.is_enabled() {
            return None;
        }

        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        if now.duration_since(buckets.last_sweep) >= self.sweep_interval {
            let window = self.window;
            buckets
                .hits
                .retain(|_, hits| hits.iter().any(|t| now.duration_since(*t) < window));
            buckets.last_sweep = now;
        }

        let hits = buckets.hits.entry(key.to_owned()).or_default();
        hits.retain(|t| now.duration_since(*t) < self.window);

        let limit = self.limit_per_window;
        let allowed = hits.len() < limit as usize;
        if allowed {
            hits.push(now);
        }
        let used = u32::try_from(hits.len()).unwrap_or(u32::MAX);
        let reset = hits
            .first()
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(self.window);

        Some(Quota {
            allowed,
            limit,
            remaining: limit.saturating_sub(used),
            reset,
        })
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.buckets.lock().hits.len()
    }
}

/// Middleware: 429 `RATE_LIMIT_EXCEEDED` once a client exhausts its window.
pub async fn rate_limit(
    State(state): State<AppState>,
    meta: ClientMeta,
    request: Request,
    next: Next,
) -> Response {
    let key = meta.ip.as_deref().unwrap_or("unknown");
    let Some(quota) = state.rate_limiter.check(key) else {
        return next.run(request).await;
    };

    let mut response = if quota.allowed {
        next.run(request).await
    } else {
        tracing::warn!(ip = key, path = %request.uri().path(), "Rate limit exceeded");
        ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMIT_EXCEEDED",
            "Too many requests from this IP, please try again later.",
        )
        .into_response()
    };
    quota.write_headers(response.headers_mut());
    response
}
