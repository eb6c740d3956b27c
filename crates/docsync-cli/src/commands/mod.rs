//! Subcommands of the `docsync` binary

pub mod config;
pub mod failures;
pub mod status;

use std::path::Path;

use anyhow::{Context as _, Result};

use docsync_cache::{DatabasePool, SqliteStateCache};

/// Opens the state cache at `db_path`, or `None` when no pass ever ran
pub async fn open_cache(db_path: &Path) -> Result<Option<SqliteStateCache>> {
    if !db_path.exists() {
        return Ok(None);
    }
    let pool = DatabasePool::new(db_path)
        .await
        .with_context(|| format!("Failed to open state cache at {}", db_path.display()))?;
    Ok(Some(SqliteStateCache::new(pool.pool().clone())))
}
