//! Authentication core.
//!
//! Provides:
//! - Credential storage with PBKDF2-SHA256 hashes (`password`, `store`)
//! - Signed access/refresh tokens with distinct keys (`token`)
//! - A refresh-token ledger keyed by SHA-256 hash, with single-use rotation
//!   and revocation (`store`)
//! - Register / login / refresh / logout use-cases (`service`)
//! - A pluggable identity resolver for federated logins (`identity`)
//!
//! ## Design Decisions
//! - Raw refresh tokens never touch storage; only their SHA-256 hex digest.
//! - Rotation is a conditional update inside one transaction, so a raw
//!   refresh token can be exchanged at most once.
//! - Nothing here knows about HTTP; `gateway` maps `AuthError` to responses.

pub mod error;
pub mod identity;
pub mod password;
pub mod service;
pub mod store;
pub mod token;
pub mod validation;

pub use error::{AuthError, FieldError, StoreError};
pub use identity::{DemoIdentityResolver, IdentityResolver, ResolvedIdentity};
pub use password::PasswordHasher;
pub use service::{
    AuthService, ClientMeta, LoginCredentials, RefreshGrant, Registration, SessionGrant,
    VerifiedRefresh,
};
pub use store::{
    CredentialStore, NewRefreshRecord, NewUser, RefreshTokenLedger, RefreshTokenRecord,
    SqliteAuthStore, User, ValidRefresh,
};
pub use token::{Claims, TokenCodec, TokenError, TokenKind, TokenSettings};
