//! JSON envelopes and the boundary error mapping.
//!
//! Success: `{ "success": true, "message": .., "data": .. }`
//! Failure: `{ "success": false, "error": .., "code": .., "message"?, "details"? }`

use axum::http::header::SET_COOKIE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::auth::{AuthError, FieldError, RefreshTokenRecord, User};

/// HTTP status for each use-case failure.
pub fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::Validation(_) => StatusCode::BAD_REQUEST,
        AuthError::UserExists => StatusCode::CONFLICT,
        AuthError::IdentityProviderDisabled => StatusCode::NOT_FOUND,
        AuthError::InvalidCredentials
        | AuthError::TokenMissing
        | AuthError::TokenInvalid
        | AuthError::UserNotFound
        | AuthError::RefreshTokenMissing
        | AuthError::RefreshTokenInvalid
        | AuthError::RefreshTokenNotFound
        | AuthError::XssAttackDetected => StatusCode::UNAUTHORIZED,
        AuthError::Store(_) | AuthError::Issue(_) | AuthError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    error: String,
    message: Option<String>,
    details: Option<Vec<FieldError>>,
    set_cookie: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, error: impl Into<String>) -> Self {
        Self {
            status,
            code,
            error: error.into(),
            message: None,
            details: None,
            set_cookie: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach a `Set-Cookie` header to the rejection.
    #[must_use]
    pub fn with_cookie(mut self, set_cookie: String) -> Self {
        self.set_cookie = Some(set_cookie);
        self
    }

    /// Map a use-case failure. Internal text only leaves the process when
    /// `expose_internal` is set.
    pub fn from_auth(err: AuthError, expose_internal: bool) -> Self {
        let status = status_for(&err);
        let code = err.code();
        match err {
            AuthError::Validation(details) => Self {
                details: Some(details),
                ..Self::new(status, code, "Validation failed")
            },
            AuthError::XssAttackDetected => Self::new(status, code, "Refresh token stolen via XSS!")
                .with_message(AuthError::XssAttackDetected.to_string()),
            AuthError::IdentityProviderDisabled => Self::new(status, code, "API endpoint not found"),
            ref internal if internal.is_internal() => {
                tracing::error!(error = %internal, "Request failed with internal error");
                let base = Self::new(status, code, "Internal server error");
                if expose_internal {
                    base.with_message(internal.to_string())
                } else {
                    base
                }
            }
            other => Self::new(status, code, other.to_string()),
        }
    }

    pub fn endpoint_not_found(method: &str, path: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "ENDPOINT_NOT_FOUND", "API endpoint not found")
            .with_message(format!("The endpoint {method} {path} does not exist"))
    }

    pub fn resource_not_found(path: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "RESOURCE_NOT_FOUND", "Resource not found")
            .with_message(format!("The requested resource {path} was not found"))
    }

    /// Malformed JSON body, before any field validation ran.
    pub fn bad_body(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "Invalid request body")
            .with_message(detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "success": false,
            "error": self.error,
            "code": self.code,
        });
        if let Some(message) = self.message {
            body["message"] = Value::String(message);
        }
        if let Some(details) = self.details {
            body["details"] = json!(details);
        }

        let mut response = (self.status, Json(body)).into_response();
        if let Some(cookie) = self.set_cookie {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().append(SET_COOKIE, value);
            }
        }
        response
    }
}

/// `{success: true, message, data?}`
pub fn success(status: StatusCode, message: &str, data: Option<Value>) -> Response {
    let mut body = json!({
        "success": true,
        "message": message,
    });
    if let Some(data) = data {
        body["data"] = data;
    }
    (status, Json(body)).into_response()
}

/// Public shape of a user. The credential hash has no field here.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl<'a> From<&'a User> for UserView<'a> {
    fn from(user: &'a User) -> Self {
        Self {
            id: &user.id,
            email: &user.email,
            first_name: &user.first_name,
            last_name: &user.last_name,
            is_verified: user.is_verified,
            created_at: user.created_at,
            updated_at: user.updated_at,
            last_login: user.last_login,
        }
    }
}

/// Public shape of an active refresh-token record.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView<'a> {
    pub id: i64,
    pub user_agent: Option<&'a str>,
    pub ip_address: Option<&'a str>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<'a> From<&'a RefreshTokenRecord> for SessionView<'a> {
    fn from(record: &'a RefreshTokenRecord) -> Self {
        Self {
            id: record.id,
            user_agent: record.user_agent.as_deref(),
            ip_address: record.ip_address.as_deref(),
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}
