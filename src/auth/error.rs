//! Error taxonomy for the authentication core.
//!
//! Every variant carries a stable machine-readable code; `gateway::response`
//! owns the HTTP status mapping.

use serde::Serialize;
use thiserror::Error;

use super::token::TokenError;
use crate::db::DatabaseError;

/// One failed input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_owned(),
            message: message.into(),
        }
    }
}

/// Storage-layer failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique constraint on `users.email`.
    #[error("Email already exists")]
    EmailTaken,

    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// The blocking worker panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::Sqlite(err))
    }
}

/// Use-case level failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("User with this email already exists")]
    UserExists,

    /// Unknown email and wrong password are deliberately the same variant.
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Access token required")]
    TokenMissing,

    #[error("Invalid or expired access token")]
    TokenInvalid,

    #[error("User not found or inactive")]
    UserNotFound,

    #[error("Refresh token not found")]
    RefreshTokenMissing,

    /// Signature checks out but the token does not belong to its ledger owner.
    #[error("Invalid refresh token")]
    RefreshTokenInvalid,

    /// Well-formed but already rotated, revoked or expired in the ledger.
    #[error("Refresh token not found or expired")]
    RefreshTokenNotFound,

    /// A value on the refresh cookie channel failed verification.
    #[error("Invalid refresh token detected - potential security breach")]
    XssAttackDetected,

    #[error("Identity provider is not enabled")]
    IdentityProviderDisabled,

    #[error("Storage failure: {0}")]
    Store(#[from] StoreError),

    #[error("Token issuance failed: {0}")]
    Issue(#[source] TokenError),

    #[error("{0}")]
    Internal(String),
}

impl AuthError {
    /// Stable code returned to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::UserExists => "USER_EXISTS",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::TokenMissing => "TOKEN_MISSING",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::RefreshTokenMissing => "REFRESH_TOKEN_MISSING",
            Self::RefreshTokenInvalid => "REFRESH_TOKEN_INVALID",
            Self::RefreshTokenNotFound => "REFRESH_TOKEN_NOT_FOUND",
            Self::XssAttackDetected => "XSS_ATTACK_DETECTED",
            Self::IdentityProviderDisabled => "ENDPOINT_NOT_FOUND",
            Self::Store(_) | Self::Issue(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Refresh-channel rejections that must also drop the cookie.
    pub fn clears_refresh_cookie(&self) -> bool {
        matches!(
            self,
            Self::XssAttackDetected | Self::RefreshTokenNotFound | Self::RefreshTokenInvalid
        )
    }

    /// Failures whose text must not reach clients in production.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Issue(_) | Self::Internal(_))
    }
}
