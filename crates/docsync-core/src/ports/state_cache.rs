//! State cache port (driven/secondary port)
//!
//! This module defines the interface for persisting the last-synchronized
//! baseline of every item, the global sync state, in-flight download
//! bookkeeping and per-item failure counters.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific and
//!   don't need domain-level classification.
//! - Every method is a single atomic operation against the store. Workers
//!   call it concurrently for sibling paths, so read-modify-write sequences
//!   (counter increments, subtree renames) must not be split across calls.
//! - All paths are normalized [`RelativePath`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    failure::{FailureRecord, OperationKind},
    newtypes::{ChangeCursor, PathPrefix, RelativePath, RemoteId},
    sync_item::CacheRecord,
};

/// Number of records per set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub files: u64,
    pub folders: u64,
    pub downloads: u64,
    pub failures: u64,
}

/// Port trait for the persistent state cache
#[async_trait::async_trait]
pub trait IStateCache: Send + Sync {
    // --- records ---

    /// Looks up the record of a path in either the file or the folder set
    async fn get_record(&self, path: &RelativePath) -> anyhow::Result<Option<CacheRecord>>;

    /// Inserts or replaces a record
    ///
    /// The path is removed from the other set in the same transaction, so it
    /// never lives in both.
    async fn save_record(&self, record: &CacheRecord) -> anyhow::Result<()>;

    /// Writes the record of a finished download and clears its in-flight
    /// download entry atomically
    async fn complete_download(&self, record: &CacheRecord) -> anyhow::Result<()>;

    /// Deletes the record of a path and every descendant record
    async fn remove_record(&self, path: &RelativePath) -> anyhow::Result<()>;

    /// Renames the key of a record and all descendant keys atomically
    async fn move_record(&self, from: &RelativePath, to: &RelativePath) -> anyhow::Result<()>;

    /// Finds the record holding a remote object id
    async fn find_by_remote_id(&self, id: &RemoteId) -> anyhow::Result<Option<CacheRecord>>;

    /// Lists every record, parents before children
    async fn list_records(&self) -> anyhow::Result<Vec<CacheRecord>>;

    /// Lists the records strictly below `path`, parents before children
    async fn list_descendants(&self, path: &RelativePath) -> anyhow::Result<Vec<CacheRecord>>;

    /// Counts records per set
    async fn count_records(&self) -> anyhow::Result<RecordCounts>;

    // --- global state ---

    /// Returns the stored change-feed cursor, `None` before the first
    /// complete sync
    async fn get_change_cursor(&self) -> anyhow::Result<Option<ChangeCursor>>;

    /// Stores the change-feed cursor
    async fn set_change_cursor(&self, cursor: &ChangeCursor) -> anyhow::Result<()>;

    /// Forgets the change-feed cursor, forcing a full crawl next pass
    async fn clear_change_cursor(&self) -> anyhow::Result<()>;

    /// Returns the local root the stored paths are relative to
    async fn get_path_prefix(&self) -> anyhow::Result<Option<PathPrefix>>;

    /// Stores the local root
    async fn set_path_prefix(&self, prefix: &PathPrefix) -> anyhow::Result<()>;

    // --- downloads ---

    /// Marks a download as started for the given remote timestamp
    async fn begin_download(
        &self,
        path: &RelativePath,
        remote_modified_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Returns the remote timestamp of an unfinished download
    async fn get_download(&self, path: &RelativePath) -> anyhow::Result<Option<DateTime<Utc>>>;

    /// Drops the in-flight download entry of a path
    async fn clear_download(&self, path: &RelativePath) -> anyhow::Result<()>;

    // --- failures ---

    /// Records one failed attempt and returns the new counter value
    ///
    /// Counters reset when `local_mtime` differs from the stored
    /// modification time. `floor` raises the counter to at least that value.
    /// `remote_modified_at` is the version the attempt worked against; `None`
    /// keeps the stored one.
    async fn record_failure(
        &self,
        path: &RelativePath,
        local_mtime: Option<DateTime<Utc>>,
        remote_modified_at: Option<DateTime<Utc>>,
        kind: OperationKind,
        message: &str,
        floor: Option<u32>,
    ) -> anyhow::Result<u32>;

    /// Returns the failure record of a path
    async fn get_failure(&self, path: &RelativePath) -> anyhow::Result<Option<FailureRecord>>;

    /// Resets all counters of a path
    async fn clear_failures(&self, path: &RelativePath) -> anyhow::Result<()>;

    /// Lists all failure records
    async fn list_failures(&self) -> anyhow::Result<Vec<FailureRecord>>;
}
