//! Connection pool shared by every request.
//!
//! A small fixed r2d2 pool over SQLite in WAL mode. Acquisition is bounded
//! by `connection_timeout`; an exhausted pool surfaces as
//! `DatabaseError::Connection` instead of queueing forever.

use super::{schema, DatabaseError, DatabaseResult};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for the database pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: u32,
    /// Upper bound on waiting for a free connection.
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 5,
            connection_timeout: Duration::from_secs(2),
        }
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, Copy)]
pub struct PoolState {
    pub connections: u32,
    pub idle_connections: u32,
}

/// Cloneable handle to the pool. Clones share the same connections.
#[derive(Clone)]
pub struct DatabasePool {
    pool: Pool<SqliteConnectionManager>,
    path: String,
}

impl std::fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabasePool").field("path", &self.path).finish()
    }
}

impl DatabasePool {
    /// Open the pool, creating the file and running migrations.
    pub fn open(path: &Path, config: PoolConfig) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let path_str = path.to_string_lossy().to_string();

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )
        });

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(1))
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        info!(path = %path_str, max_size = config.max_size, "Database pool opened");

        {
            let conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;
            schema::migrate(&conn)?;
        }

        Ok(Self {
            pool,
            path: path_str,
        })
    }

    /// Check out a connection, waiting at most the configured timeout.
    pub fn get(&self) -> DatabaseResult<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| DatabaseError::Connection(e.to_string()))
    }

    pub fn state(&self) -> PoolState {
        let state = self.pool.state();
        PoolState {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }

    pub fn health_check(&self) -> DatabaseResult<()> {
        let conn = self.get()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        debug!("Database pool health check passed");
        Ok(())
    }

    /// End of the pool's lifecycle. Idle connections close when the last
    /// handle is dropped.
    pub fn close(self) {
        let state = self.state();
        info!(
            path = %self.path,
            connections = state.connections,
            idle = state.idle_connections,
            "Database pool closed"
        );
    }
}
