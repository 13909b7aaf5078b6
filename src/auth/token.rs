//! Signed access and refresh tokens.
//!
//! Both kinds are HS256 JWTs, signed with different keys. The `type` claim
//! is checked on every verification so a refresh token is never accepted
//! where an access token is expected, even if it were signed with the
//! access key.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

use super::store::User;

pub const DEFAULT_ACCESS_SECS: u64 = 15 * 60;
pub const DEFAULT_REFRESH_SECS: u64 = 7 * 24 * 60 * 60;

static LIFETIME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)([smhd])$").unwrap());

/// Discriminant carried in the `type` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => f.write_str("access"),
            Self::Refresh => f.write_str("refresh"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub email: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// Unique per refresh token, absent on access tokens.
    #[serde(rename = "tokenId", default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    pub iat: u64,
    pub exp: u64,
    pub iss: String,
    pub aud: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Expected a {expected} token, got a {found} token")]
    KindMismatch { expected: TokenKind, found: TokenKind },

    #[error("Token encoding failed: {0}")]
    Encoding(String),

    #[error("Signing keys must be non-empty and distinct")]
    WeakKeys,
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature => TokenError::Invalid("signature mismatch".into()),
        ErrorKind::InvalidIssuer => TokenError::Invalid("issuer mismatch".into()),
        ErrorKind::InvalidAudience => TokenError::Invalid("audience mismatch".into()),
        ErrorKind::InvalidAlgorithm => TokenError::Invalid("algorithm not allowed".into()),
        other => TokenError::Invalid(format!("{other:?}")),
    }
}

/// Resolved token lifetimes in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifetimes {
    pub access_secs: u64,
    pub refresh_secs: u64,
    /// One entry per expression that fell back to its default.
    pub warnings: Vec<String>,
}

impl Lifetimes {
    /// Unparseable expressions fall back to the defaults instead of failing.
    pub fn resolve(access: &str, refresh: &str) -> Self {
        let mut warnings = Vec::new();
        let mut pick = |label: &str, expr: &str, fallback: u64| {
            parse_lifetime(expr).unwrap_or_else(|| {
                warnings.push(format!(
                    "Unrecognised {label} token lifetime '{expr}', using {fallback}s"
                ));
                fallback
            })
        };
        let access_secs = pick("access", access, DEFAULT_ACCESS_SECS);
        let refresh_secs = pick("refresh", refresh, DEFAULT_REFRESH_SECS);
        Self {
            access_secs,
            refresh_secs,
            warnings,
        }
    }
}

impl Default for Lifetimes {
    fn default() -> Self {
        Self {
            access_secs: DEFAULT_ACCESS_SECS,
            refresh_secs: DEFAULT_REFRESH_SECS,
            warnings: Vec::new(),
        }
    }
}

/// Parse `<n>s|m|h|d`. Anything else, including overflow, is `None`.
pub fn parse_lifetime(expr: &str) -> Option<u64> {
    let caps = LIFETIME_RE.captures(expr)?;
    let value: u64 = caps[1].parse().ok()?;
    let unit = match &caps[2] {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return None,
    };
    value.checked_mul(unit)
}

/// Everything the codec needs, resolved from configuration.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub access_secret: String,
    pub refresh_secret: String,
    pub lifetimes: Lifetimes,
    pub issuer: String,
    pub audience: String,
}

/// Issues and verifies both token kinds.
#[derive(Clone)]
pub struct TokenCodec {
    access_enc: EncodingKey,
    access_dec: DecodingKey,
    refresh_enc: EncodingKey,
    refresh_dec: DecodingKey,
    lifetimes: Lifetimes,
    issuer: String,
    audience: String,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("lifetimes", &self.lifetimes)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(settings: TokenSettings) -> Result<Self, TokenError> {
        if settings.access_secret.is_empty()
            || settings.refresh_secret.is_empty()
            || settings.access_secret == settings.refresh_secret
        {
            return Err(TokenError::WeakKeys);
        }
        let access = settings.access_secret.as_bytes();
        let refresh = settings.refresh_secret.as_bytes();
        Ok(Self {
            access_enc: EncodingKey::from_secret(access),
            access_dec: DecodingKey::from_secret(access),
            refresh_enc: EncodingKey::from_secret(refresh),
            refresh_dec: DecodingKey::from_secret(refresh),
            lifetimes: settings.lifetimes,
            issuer: settings.issuer,
            audience: settings.audience,
        })
    }

    pub fn issue_access(&self, user: &User) -> Result<String, TokenError> {
        let claims = self.claims_for(user, TokenKind::Access, None);
        self.encode(&claims)
    }

    /// Every refresh token carries a fresh UUID so two issued in the same
    /// second for the same user still hash differently.
    pub fn issue_refresh(&self, user: &User) -> Result<String, TokenError> {
        let token_id = uuid::Uuid::new_v4().to_string();
        let claims = self.claims_for(user, TokenKind::Refresh, Some(token_id));
        self.encode(&claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenKind::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenKind::Refresh)
    }

    /// Configured lifetime of `kind` in seconds.
    pub fn expiry_seconds(&self, kind: TokenKind) -> u64 {
        match kind {
            TokenKind::Access => self.lifetimes.access_secs,
            TokenKind::Refresh => self.lifetimes.refresh_secs,
        }
    }

    fn claims_for(&self, user: &User, kind: TokenKind, token_id: Option<String>) -> Claims {
        let now = now_secs();
        Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            kind,
            token_id,
            iat: now,
            exp: now.saturating_add(self.expiry_seconds(kind)),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        }
    }

    fn encode(&self, claims: &Claims) -> Result<String, TokenError> {
        let key = match claims.kind {
            TokenKind::Access => &self.access_enc,
            TokenKind::Refresh => &self.refresh_enc,
        };
        encode(&Header::new(Algorithm::HS256), claims, key)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let key = match expected {
            TokenKind::Access => &self.access_dec,
            TokenKind::Refresh => &self.refresh_dec,
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let data = decode::<Claims>(token, key, &validation).map_err(map_jwt_error)?;
        if data.claims.kind != expected {
            return Err(TokenError::KindMismatch {
                expected,
                found: data.claims.kind,
            });
        }
        Ok(data.claims)
    }
}

/// SHA-256 hex digest used as the ledger key.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// First 8 hex chars of a digest, safe for logs.
pub fn short_hash(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

/// Token from an `Authorization: Bearer <token>` value. Everything after
/// the single space is the token, untrimmed; an empty token counts as absent.
pub fn extract_bearer(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").filter(|t| !t.is_empty())
}

fn now_secs() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}
