//! Register / login / refresh / logout use-cases.
//!
//! `AuthService` owns no connections of its own; it orchestrates the
//! credential store, the refresh-token ledger and the token codec.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{AuthError, StoreError};
use super::identity::IdentityResolver;
use super::store::{CredentialStore, NewRefreshRecord, NewUser, RefreshTokenLedger, RefreshTokenRecord, User};
use super::token::{hash_token, short_hash, Claims, TokenCodec, TokenKind};
use super::validation;

/// Requester metadata, stored on ledger records and used in audit logs.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientMeta {
    fn ip_or_unknown(&self) -> &str {
        self.ip.as_deref().unwrap_or("unknown")
    }

    fn user_agent_or_unknown(&self) -> &str {
        self.user_agent.as_deref().unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginCredentials {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Result of register / login / federated login.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub user: User,
    pub access_token: String,
    /// Travels only in the cookie, never in a response body.
    pub refresh_token: String,
    pub expires_in: u64,
    pub is_new_user: bool,
}

#[derive(Debug, Clone)]
pub struct RefreshGrant {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

/// A refresh token that passed signature, kind and ledger checks.
#[derive(Debug, Clone)]
pub struct VerifiedRefresh {
    pub user: User,
    pub claims: Claims,
    pub token_hash: String,
}

pub struct AuthService {
    credentials: Arc<dyn CredentialStore>,
    ledger: Arc<dyn RefreshTokenLedger>,
    codec: TokenCodec,
    identity: Option<Arc<dyn IdentityResolver>>,
}

impl AuthService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        ledger: Arc<dyn RefreshTokenLedger>,
        codec: TokenCodec,
    ) -> Self {
        Self {
            credentials,
            ledger,
            codec,
            identity: None,
        }
    }

    /// Enable federated login through `resolver`.
    pub fn with_identity(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.identity = Some(resolver);
        self
    }

    pub fn identity_provider(&self) -> Option<&str> {
        self.identity.as_deref().map(|r| r.provider())
    }

    /// Access token lifetime, reported to clients as `expiresIn`.
    pub fn access_lifetime_secs(&self) -> u64 {
        self.codec.expiry_seconds(TokenKind::Access)
    }

    /// Refresh token lifetime, also the cookie's Max-Age.
    pub fn refresh_lifetime_secs(&self) -> u64 {
        self.codec.expiry_seconds(TokenKind::Refresh)
    }

    pub async fn register(
        &self,
        input: Registration,
        meta: &ClientMeta,
    ) -> Result<SessionGrant, AuthError> {
        validation::validate_register(
            input.email.as_deref(),
            input.password.as_deref(),
            input.first_name.as_deref(),
            input.last_name.as_deref(),
        )
        .map_err(AuthError::Validation)?;

        let new_user = NewUser {
            email: input.email.unwrap_or_default(),
            password: input.password.unwrap_or_default(),
            first_name: input.first_name.map(|n| n.trim().to_owned()).unwrap_or_default(),
            last_name: input.last_name.map(|n| n.trim().to_owned()).unwrap_or_default(),
            is_verified: false,
        };

        let user = match self.credentials.create_user(new_user).await {
            Ok(user) => user,
            Err(StoreError::EmailTaken) => return Err(AuthError::UserExists),
            Err(e) => return Err(e.into()),
        };
        info!(user_id = %user.id, ip = meta.ip_or_unknown(), "User registered");

        self.issue_session(user, meta, true).await
    }

    /// Unknown email and wrong password fail identically.
    pub async fn login(
        &self,
        input: LoginCredentials,
        meta: &ClientMeta,
    ) -> Result<SessionGrant, AuthError> {
        validation::validate_login(input.email.as_deref(), input.password.as_deref())
            .map_err(AuthError::Validation)?;

        let email = input.email.unwrap_or_default();
        let password = input.password.unwrap_or_default();
        let Some(user) = self.credentials.authenticate(&email, &password).await? else {
            warn!(ip = meta.ip_or_unknown(), "Failed login attempt");
            return Err(AuthError::InvalidCredentials);
        };
        info!(user_id = %user.id, ip = meta.ip_or_unknown(), "User logged in");

        self.issue_session(user, meta, false).await
    }

    /// Mocked identity-provider login, same tail as register/login.
    pub async fn federated_login(
        &self,
        email: Option<&str>,
        meta: &ClientMeta,
    ) -> Result<SessionGrant, AuthError> {
        let Some(resolver) = self.identity.as_ref() else {
            return Err(AuthError::IdentityProviderDisabled);
        };
        validation::validate_demo_login(email).map_err(AuthError::Validation)?;
        let email = email.unwrap_or_default();

        let resolved = resolver.resolve(email, self.credentials.as_ref()).await?;
        info!(
            user_id = %resolved.user.id,
            provider = resolver.provider(),
            is_new_user = resolved.is_new_user,
            "Federated login"
        );

        self.issue_session(resolved.user, meta, resolved.is_new_user)
            .await
    }

    /// Issue a token pair, record the refresh hash and stamp last login.
    async fn issue_session(
        &self,
        mut user: User,
        meta: &ClientMeta,
        is_new_user: bool,
    ) -> Result<SessionGrant, AuthError> {
        let access_token = self.codec.issue_access(&user).map_err(AuthError::Issue)?;
        let refresh_token = self.codec.issue_refresh(&user).map_err(AuthError::Issue)?;

        self.ledger
            .record(self.new_record(&user.id, &refresh_token, meta))
            .await?;

        let at = self.credentials.touch_last_login(&user.id).await?;
        user.last_login = Some(at);

        Ok(SessionGrant {
            user,
            access_token,
            refresh_token,
            expires_in: self.access_lifetime_secs(),
            is_new_user,
        })
    }

    fn new_record(&self, user_id: &str, refresh_token: &str, meta: &ClientMeta) -> NewRefreshRecord {
        let ttl = i64::try_from(self.refresh_lifetime_secs()).unwrap_or(i64::MAX);
        let expires_at = Duration::try_seconds(ttl)
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        NewRefreshRecord {
            user_id: user_id.to_owned(),
            token_hash: hash_token(refresh_token),
            expires_at,
            user_agent: meta.user_agent.clone(),
            ip_address: meta.ip.clone(),
        }
    }

    /// Bearer channel: signature, kind, then an active owner.
    pub async fn authenticate_access(&self, token: &str) -> Result<User, AuthError> {
        let claims = self.codec.verify_access(token).map_err(|e| {
            tracing::debug!(error = %e, "Access token rejected");
            AuthError::TokenInvalid
        })?;
        self.credentials
            .find_by_id(&claims.sub)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    /// Refresh channel. Verification failure on this channel is treated as
    /// presumptive token theft; a ledger miss means the token was already
    /// rotated or revoked.
    pub async fn authenticate_refresh(
        &self,
        raw: &str,
        meta: &ClientMeta,
    ) -> Result<VerifiedRefresh, AuthError> {
        let claims = match self.codec.verify_refresh(raw) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(
                    ip = meta.ip_or_unknown(),
                    user_agent = meta.user_agent_or_unknown(),
                    reason = %e,
                    "SECURITY: invalid refresh token on cookie channel"
                );
                return Err(AuthError::XssAttackDetected);
            }
        };

        let token_hash = hash_token(raw);
        let Some(hit) = self.ledger.find_valid(&token_hash).await? else {
            warn!(
                ip = meta.ip_or_unknown(),
                user_agent = meta.user_agent_or_unknown(),
                token = short_hash(&token_hash),
                user_id = %claims.sub,
                "SECURITY: refresh token not in ledger (revoked, rotated or expired)"
            );
            return Err(AuthError::RefreshTokenNotFound);
        };

        if hit.user.id != claims.sub {
            tracing::error!(
                ip = meta.ip_or_unknown(),
                user_agent = meta.user_agent_or_unknown(),
                token = short_hash(&token_hash),
                "SECURITY: refresh token subject does not match ledger owner"
            );
            return Err(AuthError::RefreshTokenInvalid);
        }

        Ok(VerifiedRefresh {
            user: hit.user,
            claims,
            token_hash,
        })
    }

    /// Rotate: the presented token is revoked and its replacement recorded
    /// atomically. Losing a concurrent rotation counts as a ledger miss.
    pub async fn refresh(
        &self,
        verified: &VerifiedRefresh,
        meta: &ClientMeta,
    ) -> Result<RefreshGrant, AuthError> {
        let user = verified.user.clone();
        let access_token = self.codec.issue_access(&user).map_err(AuthError::Issue)?;
        let refresh_token = self.codec.issue_refresh(&user).map_err(AuthError::Issue)?;

        let rotated = self
            .ledger
            .rotate(
                &verified.token_hash,
                self.new_record(&user.id, &refresh_token, meta),
            )
            .await?;
        if rotated.is_none() {
            warn!(
                ip = meta.ip_or_unknown(),
                token = short_hash(&verified.token_hash),
                "SECURITY: refresh token reused during rotation"
            );
            return Err(AuthError::RefreshTokenNotFound);
        }

        tracing::debug!(user_id = %user.id, "Refresh token rotated");
        Ok(RefreshGrant {
            user,
            access_token,
            refresh_token,
            expires_in: self.access_lifetime_secs(),
        })
    }

    /// Revoke the presented refresh token, if any. Always succeeds for
    /// absent or already-revoked tokens.
    pub async fn logout(&self, user: &User, refresh_token: Option<&str>) -> Result<bool, AuthError> {
        let revoked = match refresh_token {
            Some(raw) => self.ledger.revoke(&hash_token(raw)).await?,
            None => false,
        };
        info!(user_id = %user.id, revoked, "User logged out");
        Ok(revoked)
    }

    pub async fn logout_all(&self, user: &User) -> Result<u64, AuthError> {
        let revoked = self.ledger.revoke_all(&user.id).await?;
        info!(user_id = %user.id, revoked, "User logged out from all devices");
        Ok(revoked)
    }

    pub async fn sessions(&self, user: &User) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        Ok(self.ledger.list_active(&user.id).await?)
    }

    /// Garbage-collect expired and revoked ledger rows.
    pub async fn sweep(&self) -> Result<u64, AuthError> {
        let deleted = self.ledger.sweep_expired().await?;
        if deleted > 0 {
            info!(deleted, "Swept refresh token ledger");
        }
        Ok(deleted)
    }
}
