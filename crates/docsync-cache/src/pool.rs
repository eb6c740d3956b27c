//! Database connection pool management
//!
//! Wraps SQLx's `SqlitePool` and prepares the State Cache schema.
//!
//! ## Schema versioning
//!
//! The schema version lives in SQLite's `user_version` pragma. A fresh
//! database (version 0) gets the schema and is stamped with
//! [`SCHEMA_VERSION`]. A database stamped by a newer build is refused rather
//! than reinterpreted; its records could describe a baseline this build does
//! not understand.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::CacheError;

/// Version stamped into `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = include_str!("migrations/20261001_initial.sql");

/// Pool of SQLite connections backing one State Cache
///
/// File-based databases use WAL mode with up to 5 connections, so readers
/// do not block the single writer. In-memory databases use exactly one
/// connection that is never recycled, since each SQLite memory database is
/// private to its connection.
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (or creates) the cache database at `db_path`
    ///
    /// # Errors
    ///
    /// - `CacheError::ConnectionFailed` if the directory cannot be created or
    ///   the database cannot be opened
    /// - `CacheError::MigrationFailed` if the schema cannot be applied or the
    ///   file was written by a newer schema version
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to open state cache at {}: {}",
                    db_path.display(),
                    e
                ))
            })?;

        let version = Self::prepare(&pool).await?;
        tracing::info!(path = %db_path.display(), version, "State cache opened");

        Ok(Self { pool })
    }

    /// Creates an empty in-memory cache
    ///
    /// # Errors
    ///
    /// Same as [`DatabasePool::new`].
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("Failed to create in-memory database: {}", e))
            })?;

        Self::prepare(&pool).await?;
        tracing::debug!("In-memory state cache created");

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes every connection, waiting for in-flight queries
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Reads the stored schema version
    pub async fn schema_version(&self) -> Result<i64, CacheError> {
        Self::read_version(&self.pool).await
    }

    async fn read_version(pool: &SqlitePool) -> Result<i64, CacheError> {
        sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(pool)
            .await
            .map_err(|e| CacheError::QueryFailed(format!("Failed to read schema version: {e}")))
    }

    /// Applies the schema when needed; returns the resulting version
    async fn prepare(pool: &SqlitePool) -> Result<i64, CacheError> {
        let version = Self::read_version(pool).await?;
        if version > SCHEMA_VERSION {
            return Err(CacheError::MigrationFailed(format!(
                "state cache schema version {version} is newer than supported version {SCHEMA_VERSION}"
            )));
        }

        // Every statement is IF NOT EXISTS, so re-applying is harmless
        sqlx::raw_sql(SCHEMA).execute(pool).await.map_err(|e| {
            CacheError::MigrationFailed(format!("Failed to apply schema: {}", e))
        })?;

        if version < SCHEMA_VERSION {
            sqlx::raw_sql(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))
                .execute(pool)
                .await
                .map_err(|e| {
                    CacheError::MigrationFailed(format!("Failed to stamp schema version: {}", e))
                })?;
            tracing::debug!(from = version, to = SCHEMA_VERSION, "State cache schema applied");
        }

        Ok(SCHEMA_VERSION)
    }
}
