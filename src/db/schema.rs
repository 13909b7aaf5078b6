//! Schema migrations.
//!
//! Tables:
//! - `users`: id, email (unique, case-sensitive), password_hash, names, flags, timestamps
//! - `refresh_tokens`: ledger of issued refresh tokens keyed by SHA-256 hash

use super::{DatabaseError, DatabaseResult};
use rusqlite::Connection;

const SCHEMA_VERSION: i64 = 1;

pub fn migrate(conn: &Connection) -> DatabaseResult<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current > SCHEMA_VERSION {
        return Err(DatabaseError::Migration(format!(
            "database schema version {current} is newer than supported {SCHEMA_VERSION}"
        )));
    }
    if current == SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            first_name TEXT NOT NULL DEFAULT '',
            last_name TEXT NOT NULL DEFAULT '',
            is_verified INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_login INTEGER
        );

        CREATE TABLE IF NOT EXISTS refresh_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            token_hash TEXT NOT NULL UNIQUE,
            expires_at INTEGER NOT NULL,
            is_revoked INTEGER NOT NULL DEFAULT 0,
            user_agent TEXT,
            ip_address TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user ON refresh_tokens(user_id);
        CREATE INDEX IF NOT EXISTS idx_refresh_tokens_expires ON refresh_tokens(expires_at);

        PRAGMA user_version = 1;
        COMMIT;",
    )
    .map_err(|e| DatabaseError::Migration(e.to_string()))?;

    tracing::info!(version = SCHEMA_VERSION, "Database schema migrated");
    Ok(())
}
