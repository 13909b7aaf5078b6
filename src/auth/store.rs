//! SQLite-backed credential store and refresh-token ledger.
//!
//! Tables (see `db::schema`):
//! - `users`: id, email, password_hash, names, is_verified, is_active, timestamps
//! - `refresh_tokens`: token_hash, user_id, expires_at, is_revoked, device metadata
//!
//! All SQLite work and password hashing runs on the blocking pool so a slow
//! hash never stalls the async workers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

use super::error::StoreError;
use super::password::PasswordHasher;
use crate::db::DatabasePool;

/// A registered user. Never carries the credential hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_verified: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    /// Plaintext; hashed inside the store.
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub is_verified: bool,
}

/// One issued refresh token, by hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRefreshRecord {
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// A ledger hit together with its (active) owner.
#[derive(Debug, Clone)]
pub struct ValidRefresh {
    pub record: RefreshTokenRecord,
    pub user: User,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError>;

    /// Active users only.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Active users only.
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// `None` for an unknown email, an inactive user or a wrong password.
    async fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>, StoreError>;

    async fn touch_last_login(&self, user_id: &str) -> Result<DateTime<Utc>, StoreError>;
}

#[async_trait]
pub trait RefreshTokenLedger: Send + Sync {
    async fn record(&self, record: NewRefreshRecord) -> Result<i64, StoreError>;

    /// Hit only when unexpired, unrevoked and owned by an active user.
    async fn find_valid(&self, token_hash: &str) -> Result<Option<ValidRefresh>, StoreError>;

    /// Returns whether a live record was revoked. Unknown hashes are a no-op.
    async fn revoke(&self, token_hash: &str) -> Result<bool, StoreError>;

    async fn revoke_all(&self, user_id: &str) -> Result<u64, StoreError>;

    /// Revoke `old_hash` and record `replacement` in one transaction.
    /// `None` when `old_hash` was no longer valid; nothing is written then.
    async fn rotate(
        &self,
        old_hash: &str,
        replacement: NewRefreshRecord,
    ) -> Result<Option<i64>, StoreError>;

    /// Delete expired or revoked rows.
    async fn sweep_expired(&self) -> Result<u64, StoreError>;

    async fn list_active(&self, user_id: &str) -> Result<Vec<RefreshTokenRecord>, StoreError>;
}

const USER_COLUMNS: &str =
    "u.id, u.email, u.first_name, u.last_name, u.is_verified, u.is_active, \
     u.created_at, u.updated_at, u.last_login";

const TOKEN_COLUMNS: &str =
    "rt.id, rt.user_id, rt.token_hash, rt.expires_at, rt.is_revoked, \
     rt.user_agent, rt.ip_address, rt.created_at";

/// Column count of `TOKEN_COLUMNS`, the offset of user columns in joins.
const TOKEN_COLUMN_COUNT: usize = 8;

fn from_epoch(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn user_from_row(row: &Row<'_>, at: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(at)?,
        email: row.get(at + 1)?,
        first_name: row.get(at + 2)?,
        last_name: row.get(at + 3)?,
        is_verified: row.get(at + 4)?,
        is_active: row.get(at + 5)?,
        created_at: from_epoch(row.get(at + 6)?),
        updated_at: from_epoch(row.get(at + 7)?),
        last_login: row.get::<_, Option<i64>>(at + 8)?.map(from_epoch),
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<RefreshTokenRecord> {
    Ok(RefreshTokenRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        token_hash: row.get(2)?,
        expires_at: from_epoch(row.get(3)?),
        is_revoked: row.get(4)?,
        user_agent: row.get(5)?,
        ip_address: row.get(6)?,
        created_at: from_epoch(row.get(7)?),
    })
}

fn insert_record(conn: &rusqlite::Connection, record: &NewRefreshRecord) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO refresh_tokens (user_id, token_hash, expires_at, user_agent, ip_address, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.user_id,
            record.token_hash,
            record.expires_at.timestamp(),
            record.user_agent,
            record.ip_address,
            Utc::now().timestamp(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Store over the shared connection pool.
#[derive(Debug, Clone)]
pub struct SqliteAuthStore {
    pool: DatabasePool,
    hasher: PasswordHasher,
}

impl SqliteAuthStore {
    pub fn new(pool: DatabasePool, hasher: PasswordHasher) -> Self {
        Self { pool, hasher }
    }

    /// Run `f` with a checked-out connection on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&DatabasePool, PasswordHasher) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let hasher = self.hasher;
        tokio::task::spawn_blocking(move || f(&pool, hasher))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl CredentialStore for SqliteAuthStore {
    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        self.blocking(move |pool, hasher| {
            let password_hash = hasher.hash(&new_user.password);
            let now = Utc::now();
            let user = User {
                id: uuid::Uuid::new_v4().to_string(),
                email: new_user.email,
                first_name: new_user.first_name,
                last_name: new_user.last_name,
                is_verified: new_user.is_verified,
                is_active: true,
                created_at: from_epoch(now.timestamp()),
                updated_at: from_epoch(now.timestamp()),
                last_login: None,
            };

            let conn = pool.get()?;
            let result = conn.execute(
                "INSERT INTO users (id, email, password_hash, first_name, last_name, is_verified, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    user.id,
                    user.email,
                    password_hash,
                    user.first_name,
                    user.last_name,
                    user.is_verified,
                    now.timestamp(),
                ],
            );

            match result {
                Ok(_) => Ok(user),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::EmailTaken)
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = email.to_owned();
        self.blocking(move |pool, _| {
            let conn = pool.get()?;
            let user = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.email = ?1 AND u.is_active = 1"),
                    params![email],
                    |row| user_from_row(row, 0),
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let id = id.to_owned();
        self.blocking(move |pool, _| {
            let conn = pool.get()?;
            let user = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1 AND u.is_active = 1"),
                    params![id],
                    |row| user_from_row(row, 0),
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>, StoreError> {
        let email = email.to_owned();
        let password = password.to_owned();
        self.blocking(move |pool, hasher| {
            let found = {
                let conn = pool.get()?;
                conn.query_row(
                    &format!(
                        "SELECT {USER_COLUMNS}, u.password_hash FROM users u
                         WHERE u.email = ?1 AND u.is_active = 1"
                    ),
                    params![email],
                    |row| Ok((user_from_row(row, 0)?, row.get::<_, String>(9)?)),
                )
                .optional()?
            };

            match found {
                Some((user, stored)) if hasher.verify(&password, &stored) => Ok(Some(user)),
                Some(_) => Ok(None),
                None => {
                    // Same cost as a real comparison.
                    hasher.burn(&password);
                    Ok(None)
                }
            }
        })
        .await
    }

    async fn touch_last_login(&self, user_id: &str) -> Result<DateTime<Utc>, StoreError> {
        let user_id = user_id.to_owned();
        self.blocking(move |pool, _| {
            let now = from_epoch(Utc::now().timestamp());
            let conn = pool.get()?;
            conn.execute(
                "UPDATE users SET last_login = ?1 WHERE id = ?2",
                params![now.timestamp(), user_id],
            )?;
            Ok(now)
        })
        .await
    }
}

#[async_trait]
impl RefreshTokenLedger for SqliteAuthStore {
    async fn record(&self, record: NewRefreshRecord) -> Result<i64, StoreError> {
        self.blocking(move |pool, _| {
            let conn = pool.get()?;
            Ok(insert_record(&conn, &record)?)
        })
        .await
    }

    async fn find_valid(&self, token_hash: &str) -> Result<Option<ValidRefresh>, StoreError> {
        let token_hash = token_hash.to_owned();
        self.blocking(move |pool, _| {
            let conn = pool.get()?;
            let hit = conn
                .query_row(
                    &format!(
                        "SELECT {TOKEN_COLUMNS}, {USER_COLUMNS}
                         FROM refresh_tokens rt
                         JOIN users u ON u.id = rt.user_id
                         WHERE rt.token_hash = ?1
                           AND rt.expires_at > ?2
                           AND rt.is_revoked = 0
                           AND u.is_active = 1"
                    ),
                    params![token_hash, Utc::now().timestamp()],
                    |row| {
                        Ok(ValidRefresh {
                            record: record_from_row(row)?,
                            user: user_from_row(row, TOKEN_COLUMN_COUNT)?,
                        })
                    },
                )
                .optional()?;
            Ok(hit)
        })
        .await
    }

    async fn revoke(&self, token_hash: &str) -> Result<bool, StoreError> {
        let token_hash = token_hash.to_owned();
        self.blocking(move |pool, _| {
            let conn = pool.get()?;
            let changed = conn.execute(
                "UPDATE refresh_tokens SET is_revoked = 1 WHERE token_hash = ?1 AND is_revoked = 0",
                params![token_hash],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn revoke_all(&self, user_id: &str) -> Result<u64, StoreError> {
        let user_id = user_id.to_owned();
        self.blocking(move |pool, _| {
            let conn = pool.get()?;
            let changed = conn.execute(
                "UPDATE refresh_tokens SET is_revoked = 1 WHERE user_id = ?1 AND is_revoked = 0",
                params![user_id],
            )?;
            Ok(changed as u64)
        })
        .await
    }

    async fn rotate(
        &self,
        old_hash: &str,
        replacement: NewRefreshRecord,
    ) -> Result<Option<i64>, StoreError> {
        let old_hash = old_hash.to_owned();
        self.blocking(move |pool, _| {
            let mut conn = pool.get()?;
            // IMMEDIATE takes the write lock up front, so two rotations of
            // the same hash serialize on the conditional update below.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let revoked = tx.execute(
                "UPDATE refresh_tokens SET is_revoked = 1
                 WHERE token_hash = ?1
                   AND user_id = ?2
                   AND is_revoked = 0
                   AND expires_at > ?3
                   AND EXISTS (
                       SELECT 1 FROM users u
                       WHERE u.id = refresh_tokens.user_id AND u.is_active = 1
                   )",
                params![old_hash, replacement.user_id, Utc::now().timestamp()],
            )?;
            if revoked == 0 {
                return Ok(None);
            }

            let id = insert_record(&tx, &replacement)?;
            tx.commit()?;
            Ok(Some(id))
        })
        .await
    }

    async fn sweep_expired(&self) -> Result<u64, StoreError> {
        self.blocking(move |pool, _| {
            let conn = pool.get()?;
            let deleted = conn.execute(
                "DELETE FROM refresh_tokens WHERE expires_at <= ?1 OR is_revoked = 1",
                params![Utc::now().timestamp()],
            )?;
            Ok(deleted as u64)
        })
        .await
    }

    async fn list_active(&self, user_id: &str) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        let user_id = user_id.to_owned();
        self.blocking(move |pool, _| {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {TOKEN_COLUMNS} FROM refresh_tokens rt
                 WHERE rt.user_id = ?1 AND rt.is_revoked = 0 AND rt.expires_at > ?2
                 ORDER BY rt.created_at DESC, rt.id DESC"
            ))?;
            let rows = stmt
                .query_map(params![user_id, Utc::now().timestamp()], record_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}
