//! SQLite implementation of IStateCache
//!
//! This module provides the concrete SQLite-based implementation of the
//! state cache port defined in docsync-core. It handles domain type
//! conversion and SQL query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type     | SQL Type | Strategy                                             |
//! |-----------------|----------|------------------------------------------------------|
//! | RelativePath    | TEXT     | String via `.as_str()` / `RelativePath::new()`        |
//! | RemoteId        | TEXT     | String via `.as_str()` / `RemoteId::new()`            |
//! | Checksum        | TEXT     | String via `.as_str()` / `Checksum::new()`            |
//! | ChangeCursor    | TEXT     | `general` row via `.as_str()` / `ChangeCursor::new()` |
//! | PathPrefix      | TEXT     | `general` row via `to_str()` / `PathPrefix::new()`    |
//! | DateTime<Utc>   | TEXT     | RFC 3339 via `to_rfc3339()` / `parse_datetime()`      |
//! | ItemMetadata    | TEXT     | serde_json object                                     |
//!
//! ## Subtrees
//!
//! A subtree is selected with `substr(path, 1, length(prefix)) = prefix`
//! where `prefix` is the folder path plus `/` (empty for the root). This
//! avoids `LIKE` and its wildcard escaping.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use docsync_core::domain::{
    failure::{FailureCounter, FailureRecord, OperationKind},
    newtypes::{ChangeCursor, Checksum, PathPrefix, RelativePath, RemoteId},
    sync_item::{CacheRecord, ItemMetadata},
};
use docsync_core::ports::{IStateCache, RecordCounts};

use crate::CacheError;

/// `general` key of the change-feed cursor
const KEY_CHANGE_CURSOR: &str = "ChangeLogToken";

/// `general` key of the local root
const KEY_PATH_PREFIX: &str = "PathPrefix";

/// Tables whose rows are keyed by path and move with their subtree
const PATH_KEYED_TABLES: [&str; 4] = ["files", "folders", "downloads", "failed_operations"];

/// SQLite-based implementation of the state cache port
///
/// All operations are performed through a connection pool. Multi-statement
/// operations run inside one transaction.
#[derive(Clone)]
pub struct SqliteStateCache {
    pool: SqlitePool,
}

impl SqliteStateCache {
    /// Creates a new cache instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM general WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), CacheError> {
        sqlx::query("INSERT OR REPLACE INTO general (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Parse a DateTime<Utc> from an ISO 8601 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Try parsing without timezone (SQLite default format)
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
                .map(|ndt| ndt.and_utc())
        })
        .map_err(|e| {
            CacheError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

/// Parse an optional DateTime<Utc> from an optional string
fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, CacheError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

fn parse_path(s: String) -> Result<RelativePath, CacheError> {
    RelativePath::new(s)
        .map_err(|e| CacheError::SerializationError(format!("Invalid stored path: {}", e)))
}

/// Prefix every strict descendant of `path` starts with
fn subtree_prefix(path: &RelativePath) -> String {
    if path.is_root() {
        String::new()
    } else {
        format!("{}/", path.as_str())
    }
}

fn count_from_db(value: i64) -> Result<u32, CacheError> {
    u32::try_from(value)
        .map_err(|_| CacheError::SerializationError(format!("Invalid failure count: {}", value)))
}

// ============================================================================
// Row mapping functions
// ============================================================================

/// Reconstruct a CacheRecord from a row of the `records` view
fn record_from_row(row: &SqliteRow) -> Result<CacheRecord, CacheError> {
    let path_str: String = row.get("path");
    let is_folder: i64 = row.get("is_folder");
    let remote_id_str: String = row.get("remote_id");
    let remote_modified_str: String = row.get("remote_modified_at");
    let checksum_str: Option<String> = row.get("checksum");
    let metadata_str: String = row.get("metadata");
    let download_str: Option<String> = row.get("download_modified_at");

    let remote_id = RemoteId::new(remote_id_str.clone()).map_err(|e| {
        CacheError::SerializationError(format!("Invalid RemoteId '{}': {}", remote_id_str, e))
    })?;

    let checksum = checksum_str
        .map(|s| {
            Checksum::new(s.clone()).map_err(|e| {
                CacheError::SerializationError(format!("Invalid checksum '{}': {}", s, e))
            })
        })
        .transpose()?;

    let metadata: ItemMetadata = serde_json::from_str(&metadata_str)
        .map_err(|e| CacheError::SerializationError(format!("Invalid metadata JSON: {}", e)))?;

    Ok(CacheRecord {
        path: parse_path(path_str)?,
        is_folder: is_folder != 0,
        remote_id,
        remote_modified_at: parse_datetime(&remote_modified_str)?,
        checksum,
        metadata,
        last_download_modified_at: parse_optional_datetime(download_str)?,
    })
}

/// Reconstruct a FailureRecord from a `failed_operations` row
fn failure_from_row(row: &SqliteRow) -> Result<FailureRecord, CacheError> {
    let path_str: String = row.get("path");
    let mtime_str: Option<String> = row.get("last_local_modification");
    let remote_str: Option<String> = row.get("last_remote_modification");

    let counter = |kind: OperationKind| -> Result<FailureCounter, CacheError> {
        let count: i64 = row.get(format!("{}_count", kind.as_str()).as_str());
        let message: Option<String> = row.get(format!("{}_message", kind.as_str()).as_str());
        Ok(FailureCounter {
            count: count_from_db(count)?,
            message,
        })
    };

    Ok(FailureRecord {
        path: parse_path(path_str)?,
        last_local_modification: parse_optional_datetime(mtime_str)?,
        last_remote_modification: parse_optional_datetime(remote_str)?,
        upload: counter(OperationKind::Upload)?,
        download: counter(OperationKind::Download)?,
        change: counter(OperationKind::Change)?,
        delete: counter(OperationKind::Delete)?,
    })
}

// ============================================================================
// Transaction helpers
// ============================================================================

/// Upsert a record into its set and drop the path from the other set
async fn save_record_tx(
    tx: &mut Transaction<'_, Sqlite>,
    record: &CacheRecord,
) -> anyhow::Result<()> {
    let path = record.path.as_str();
    let remote_modified_at = record.remote_modified_at.to_rfc3339();
    let metadata = serde_json::to_string(&record.metadata)
        .map_err(|e| anyhow::anyhow!("Failed to serialize metadata: {}", e))?;

    if record.is_folder {
        sqlx::query(
            "INSERT OR REPLACE INTO folders (path, remote_id, remote_modified_at, metadata) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(path)
        .bind(record.remote_id.as_str())
        .bind(&remote_modified_at)
        .bind(&metadata)
        .execute(&mut **tx)
        .await?;

        sqlx::query("DELETE FROM files WHERE path = ?")
            .bind(path)
            .execute(&mut **tx)
            .await?;
    } else {
        sqlx::query(
            "INSERT OR REPLACE INTO files \
             (path, remote_id, remote_modified_at, checksum, metadata) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(path)
        .bind(record.remote_id.as_str())
        .bind(&remote_modified_at)
        .bind(record.checksum.as_ref().map(|c| c.as_str()))
        .bind(&metadata)
        .execute(&mut **tx)
        .await?;

        sqlx::query("DELETE FROM folders WHERE path = ?")
            .bind(path)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

/// Delete `path` and everything below it from one path-keyed table
async fn delete_subtree_tx(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    path: &RelativePath,
) -> anyhow::Result<u64> {
    let prefix = subtree_prefix(path);
    let sql = format!("DELETE FROM {table} WHERE path = ? OR substr(path, 1, length(?)) = ?");
    let result = sqlx::query(&sql)
        .bind(path.as_str())
        .bind(&prefix)
        .bind(&prefix)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected())
}

// ============================================================================
// IStateCache implementation
// ============================================================================

#[async_trait::async_trait]
impl IStateCache for SqliteStateCache {
    // --- records ---

    async fn get_record(&self, path: &RelativePath) -> anyhow::Result<Option<CacheRecord>> {
        let row = sqlx::query("SELECT * FROM records WHERE path = ?")
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(record_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn save_record(&self, record: &CacheRecord) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        save_record_tx(&mut tx, record).await?;
        tx.commit().await?;

        tracing::trace!(path = %record.path, folder = record.is_folder, "Saved cache record");
        Ok(())
    }

    async fn complete_download(&self, record: &CacheRecord) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        save_record_tx(&mut tx, record).await?;
        sqlx::query("DELETE FROM downloads WHERE path = ?")
            .bind(record.path.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::trace!(path = %record.path, "Completed download record");
        Ok(())
    }

    async fn remove_record(&self, path: &RelativePath) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for table in ["files", "folders", "downloads"] {
            removed += delete_subtree_tx(&mut tx, table, path).await?;
        }
        tx.commit().await?;

        tracing::trace!(path = %path, removed, "Removed cache records");
        Ok(())
    }

    async fn move_record(&self, from: &RelativePath, to: &RelativePath) -> anyhow::Result<()> {
        if from.is_root() || to.is_root() || to == from || to.is_descendant_of(from) {
            anyhow::bail!("Cannot move record {} to {}", from, to);
        }

        let prefix = subtree_prefix(from);
        let mut tx = self.pool.begin().await?;

        for table in PATH_KEYED_TABLES {
            delete_subtree_tx(&mut tx, table, to).await?;

            let sql = format!(
                "UPDATE {table} SET path = ? || substr(path, length(?) + 1) \
                 WHERE path = ? OR substr(path, 1, length(?)) = ?"
            );
            sqlx::query(&sql)
                .bind(to.as_str())
                .bind(from.as_str())
                .bind(from.as_str())
                .bind(&prefix)
                .bind(&prefix)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::debug!(from = %from, to = %to, "Moved cache records");
        Ok(())
    }

    async fn find_by_remote_id(&self, id: &RemoteId) -> anyhow::Result<Option<CacheRecord>> {
        let row = sqlx::query("SELECT * FROM records WHERE remote_id = ? ORDER BY path LIMIT 1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(record_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_records(&self) -> anyhow::Result<Vec<CacheRecord>> {
        // A parent path is a strict prefix of its children, so it sorts first
        let rows = sqlx::query("SELECT * FROM records ORDER BY path")
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(record_from_row(row)?);
        }
        Ok(records)
    }

    async fn list_descendants(&self, path: &RelativePath) -> anyhow::Result<Vec<CacheRecord>> {
        let prefix = subtree_prefix(path);
        let rows = sqlx::query(
            "SELECT * FROM records \
             WHERE substr(path, 1, length(?)) = ? AND path <> ? \
             ORDER BY path",
        )
        .bind(&prefix)
        .bind(&prefix)
        .bind(path.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(record_from_row(row)?);
        }
        Ok(records)
    }

    async fn count_records(&self) -> anyhow::Result<RecordCounts> {
        let mut counts = [0u64; 4];
        for (slot, table) in counts.iter_mut().zip(PATH_KEYED_TABLES) {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await?;
            *slot = count.max(0) as u64;
        }

        Ok(RecordCounts {
            files: counts[0],
            folders: counts[1],
            downloads: counts[2],
            failures: counts[3],
        })
    }

    // --- global state ---

    async fn get_change_cursor(&self) -> anyhow::Result<Option<ChangeCursor>> {
        Ok(self.get_value(KEY_CHANGE_CURSOR).await?.map(ChangeCursor::new))
    }

    async fn set_change_cursor(&self, cursor: &ChangeCursor) -> anyhow::Result<()> {
        self.set_value(KEY_CHANGE_CURSOR, cursor.as_str()).await?;
        tracing::trace!(cursor = %cursor, "Saved change cursor");
        Ok(())
    }

    async fn clear_change_cursor(&self) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM general WHERE key = ?")
            .bind(KEY_CHANGE_CURSOR)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_path_prefix(&self) -> anyhow::Result<Option<PathPrefix>> {
        match self.get_value(KEY_PATH_PREFIX).await? {
            Some(value) => {
                let prefix = PathPrefix::new(PathBuf::from(&value)).map_err(|e| {
                    CacheError::SerializationError(format!(
                        "Invalid path prefix '{}': {}",
                        value, e
                    ))
                })?;
                Ok(Some(prefix))
            }
            None => Ok(None),
        }
    }

    async fn set_path_prefix(&self, prefix: &PathPrefix) -> anyhow::Result<()> {
        let value = prefix.as_path().to_str().ok_or_else(|| {
            anyhow::anyhow!("Path prefix is not valid UTF-8: {}", prefix.as_path().display())
        })?;
        self.set_value(KEY_PATH_PREFIX, value).await?;
        Ok(())
    }

    // --- downloads ---

    async fn begin_download(
        &self,
        path: &RelativePath,
        remote_modified_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query("INSERT OR REPLACE INTO downloads (path, remote_modified_at) VALUES (?, ?)")
            .bind(path.as_str())
            .bind(remote_modified_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_download(&self, path: &RelativePath) -> anyhow::Result<Option<DateTime<Utc>>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT remote_modified_at FROM downloads WHERE path = ?")
                .bind(path.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(parse_optional_datetime(value)?)
    }

    async fn clear_download(&self, path: &RelativePath) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM downloads WHERE path = ?")
            .bind(path.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- failures ---

    async fn record_failure(
        &self,
        path: &RelativePath,
        local_mtime: Option<DateTime<Utc>>,
        remote_modified_at: Option<DateTime<Utc>>,
        kind: OperationKind,
        message: &str,
        floor: Option<u32>,
    ) -> anyhow::Result<u32> {
        let mtime = local_mtime.map(|dt| dt.to_rfc3339());
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the write lock before reading
        sqlx::query(
            "INSERT OR IGNORE INTO failed_operations (path, last_local_modification) \
             VALUES (?, ?)",
        )
        .bind(path.as_str())
        .bind(&mtime)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT * FROM failed_operations WHERE path = ?")
            .bind(path.as_str())
            .fetch_one(&mut *tx)
            .await?;
        let mut record = failure_from_row(&row)?;
        let count = record.record(local_mtime, kind, message, floor);
        let remote = remote_modified_at
            .or(record.last_remote_modification)
            .map(|dt| dt.to_rfc3339());

        sqlx::query(
            "UPDATE failed_operations SET last_local_modification = ?, \
             last_remote_modification = ?, \
             upload_count = ?, upload_message = ?, \
             download_count = ?, download_message = ?, \
             change_count = ?, change_message = ?, \
             delete_count = ?, delete_message = ? \
             WHERE path = ?",
        )
        .bind(&mtime)
        .bind(&remote)
        .bind(i64::from(record.upload.count))
        .bind(&record.upload.message)
        .bind(i64::from(record.download.count))
        .bind(&record.download.message)
        .bind(i64::from(record.change.count))
        .bind(&record.change.message)
        .bind(i64::from(record.delete.count))
        .bind(&record.delete.message)
        .bind(path.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::trace!(path = %path, kind = %kind, count, "Recorded failure");
        Ok(count)
    }

    async fn get_failure(&self, path: &RelativePath) -> anyhow::Result<Option<FailureRecord>> {
        let row = sqlx::query("SELECT * FROM failed_operations WHERE path = ?")
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(failure_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn clear_failures(&self, path: &RelativePath) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM failed_operations WHERE path = ?")
            .bind(path.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_failures(&self) -> anyhow::Result<Vec<FailureRecord>> {
        let rows = sqlx::query("SELECT * FROM failed_operations ORDER BY path")
            .fetch_all(&self.pool)
            .await?;

        let mut failures = Vec::with_capacity(rows.len());
        for row in &rows {
            failures.push(failure_from_row(row)?);
        }
        Ok(failures)
    }
}
