//! Refresh token cookie.
//!
//! `HttpOnly`, `SameSite=Strict`, scoped to the auth route prefix, `Secure`
//! in production. Clearing reuses the exact same path and flags, otherwise
//! browsers keep the old cookie.

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;

pub const REFRESH_COOKIE_NAME: &str = "refreshToken";

#[derive(Debug, Clone)]
pub struct RefreshCookie {
    path: String,
    secure: bool,
    domain: Option<String>,
    max_age_secs: u64,
}

impl RefreshCookie {
    /// Cookie scoped to `<api_prefix>/auth`.
    pub fn new(api_prefix: &str, secure: bool, domain: Option<String>, max_age_secs: u64) -> Self {
        Self {
            path: format!("{}/auth", api_prefix.trim_end_matches('/')),
            secure,
            domain: domain.filter(|d| !d.is_empty()),
            max_age_secs,
        }
    }

    fn attributes(&self, max_age: u64) -> String {
        let mut attrs = format!("Path={}; Max-Age={max_age}; HttpOnly; SameSite=Strict", self.path);
        if self.secure {
            attrs.push_str("; Secure");
        }
        if let Some(ref domain) = self.domain {
            attrs.push_str("; Domain=");
            attrs.push_str(domain);
        }
        attrs
    }

    /// `Set-Cookie` value carrying `token`.
    #[must_use]
    pub fn issue(&self, token: &str) -> String {
        format!(
            "{REFRESH_COOKIE_NAME}={token}; {}",
            self.attributes(self.max_age_secs)
        )
    }

    /// `Set-Cookie` value that removes the cookie.
    #[must_use]
    pub fn clear(&self) -> String {
        format!(
            "{REFRESH_COOKIE_NAME}=; {}; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
            self.attributes(0)
        )
    }

    /// Refresh token from the request's `Cookie` headers. An empty value
    /// counts as absent.
    pub fn extract(headers: &HeaderMap) -> Option<String> {
        let prefix = format!("{REFRESH_COOKIE_NAME}=");
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|part| part.trim().strip_prefix(prefix.as_str()))
            .map(|value| value.trim().trim_matches('"'))
            .find(|value| !value.is_empty())
            .map(str::to_owned)
    }

    pub fn attach_issue(&self, response: &mut Response, token: &str) {
        append_set_cookie(response.headers_mut(), &self.issue(token));
    }

    pub fn attach_clear(&self, response: &mut Response) {
        append_set_cookie(response.headers_mut(), &self.clear());
    }
}

fn append_set_cookie(headers: &mut HeaderMap, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            headers.append(SET_COOKIE, value);
        }
        Err(e) => tracing::error!("Refusing to emit malformed Set-Cookie header: {e}"),
    }
}
