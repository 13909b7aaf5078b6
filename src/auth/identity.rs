//! Identity resolution for federated logins.
//!
//! A resolver turns a provider-asserted email into a local user, creating
//! one when needed. Token issuance stays in `AuthService`, so swapping the
//! demo resolver for a real provider does not touch the session core.

use async_trait::async_trait;
use rand::RngCore;

use super::error::StoreError;
use super::store::{CredentialStore, NewUser, User};

/// Email that always resolves to the fixed demo identity.
pub const DEMO_EMAIL: &str = "demo@authkit.com";

#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub user: User,
    pub is_new_user: bool,
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Provider name reported to clients (e.g. `google`).
    fn provider(&self) -> &str;

    async fn resolve(
        &self,
        email: &str,
        credentials: &dyn CredentialStore,
    ) -> Result<ResolvedIdentity, StoreError>;
}

/// Mocked provider: trusts whatever email it is given. Never enable in
/// production.
#[derive(Debug, Clone, Default)]
pub struct DemoIdentityResolver;

impl DemoIdentityResolver {
    pub fn new() -> Self {
        Self
    }

    /// Names the provider would have asserted for `email`.
    fn profile_for(email: &str) -> (String, String) {
        if email == DEMO_EMAIL {
            return ("Demo".into(), "User".into());
        }
        let local = email.split('@').next().unwrap_or_default();
        let mut parts = local.split('.').filter(|p| !p.is_empty());
        let first = parts.next().unwrap_or("User");
        let last = parts.next().unwrap_or("Google");
        (truncate_name(first), truncate_name(last))
    }
}

#[async_trait]
impl IdentityResolver for DemoIdentityResolver {
    fn provider(&self) -> &str {
        "google"
    }

    async fn resolve(
        &self,
        email: &str,
        credentials: &dyn CredentialStore,
    ) -> Result<ResolvedIdentity, StoreError> {
        if let Some(user) = credentials.find_by_email(email).await? {
            tracing::info!(user_id = %user.id, "Demo identity linked to existing account");
            return Ok(ResolvedIdentity {
                user,
                is_new_user: false,
            });
        }

        let (first_name, last_name) = Self::profile_for(email);
        let created = credentials
            .create_user(NewUser {
                email: email.to_owned(),
                password: random_credential(),
                first_name,
                last_name,
                is_verified: true,
            })
            .await;

        match created {
            Ok(user) => {
                tracing::info!(user_id = %user.id, "Demo identity provisioned new account");
                Ok(ResolvedIdentity {
                    user,
                    is_new_user: true,
                })
            }
            // Lost a race with a concurrent provision of the same email.
            Err(StoreError::EmailTaken) => {
                let user = credentials
                    .find_by_email(email)
                    .await?
                    .ok_or(StoreError::EmailTaken)?;
                Ok(ResolvedIdentity {
                    user,
                    is_new_user: false,
                })
            }
            Err(e) => Err(e),
        }
    }
}

fn truncate_name(name: &str) -> String {
    name.chars().take(50).collect()
}

/// Unguessable password for accounts that only ever log in via a provider.
fn random_credential() -> String {
    let mut bytes = [0u8; 24];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::PasswordHasher;
    use crate::auth::store::SqliteAuthStore;
    use crate::db::{DatabasePool, PoolConfig};
    use tempfile::TempDir;

    fn test_store() -> (SqliteAuthStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let pool = DatabasePool::open(&tmp.path().join("auth.db"), PoolConfig::default()).unwrap();
        (SqliteAuthStore::new(pool, PasswordHasher::new(1_000)), tmp)
    }

    #[test]
    fn profile_from_local_part() {
        assert_eq!(
            DemoIdentityResolver::profile_for("jane.doe@example.com"),
            ("jane".into(), "doe".into())
        );
        assert_eq!(
            DemoIdentityResolver::profile_for("solo@example.com"),
            ("solo".into(), "Google".into())
        );
        assert_eq!(
            DemoIdentityResolver::profile_for(DEMO_EMAIL),
            ("Demo".into(), "User".into())
        );
    }

    #[tokio::test]
    async fn demo_user_is_provisioned_once() {
        let (store, _tmp) = test_store();
        let resolver = DemoIdentityResolver::new();

        let first = resolver.resolve(DEMO_EMAIL, &store).await.unwrap();
        assert!(first.is_new_user);
        assert_eq!(first.user.first_name, "Demo");
        assert_eq!(first.user.last_name, "User");

        let second = resolver.resolve(DEMO_EMAIL, &store).await.unwrap();
        assert!(!second.is_new_user);
        assert_eq!(second.user.id, first.user.id);
    }

    #[tokio::test]
    async fn links_existing_account() {
        let (store, _tmp) = test_store();
        let existing = store
            .create_user(NewUser {
                email: "alice@example.com".into(),
                password: "Abcdef1!".into(),
                first_name: "Alice".into(),
                last_name: "Liddell".into(),
                is_verified: false,
            })
            .await
            .unwrap();

        let resolved = DemoIdentityResolver::new()
            .resolve("alice@example.com", &store)
            .await
            .unwrap();
        assert!(!resolved.is_new_user);
        assert_eq!(resolved.user.id, existing.id);
        assert_eq!(resolved.user.first_name, "Alice");
    }

    #[tokio::test]
    async fn provisioned_account_has_no_known_password() {
        let (store, _tmp) = test_store();
        DemoIdentityResolver::new()
            .resolve("bob.builder@example.com", &store)
            .await
            .unwrap();
        for guess in ["", "demo123", "Abcdef1!"] {
            assert!(store
                .authenticate("bob.builder@example.com", guess)
                .await
                .unwrap()
                .is_none());
        }
    }
}
