//! docsync Cache - Persistent sync state
//!
//! SQLite-based cache for:
//! - The last-synchronized baseline of every file and folder
//! - Global state (change-feed cursor, local path prefix)
//! - In-flight download bookkeeping
//! - Per-path failure counters
//!
//! ## Architecture
//!
//! This crate implements the `IStateCache` port from `docsync-core` using
//! SQLite as the storage backend. It is a driven (secondary) adapter in the
//! hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteStateCache`] - Full `IStateCache` implementation
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use docsync_cache::{DatabasePool, SqliteStateCache};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/docsync/state.db")).await?;
//! let cache = SqliteStateCache::new(pool.pool().clone());
//! // Use cache as IStateCache...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod state_cache;

pub use pool::DatabasePool;
pub use state_cache::SqliteStateCache;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be mapped back onto a domain type
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}
