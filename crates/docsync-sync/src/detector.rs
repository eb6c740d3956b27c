//! Local change detection
//!
//! Decides whether a local file differs from its cached baseline by
//! comparing SHA-256 digests. No remote data is involved.
//!
//! The executor asks this before pruning a file left in a folder whose
//! remote counterpart is gone: only an unchanged, tracked file is removed.
//! The pass itself hashes through `LocalFileSystem::observe` and compares
//! inside the triplet, so it never goes through here.

use std::sync::Arc;

use tracing::debug;

use docsync_core::domain::newtypes::RelativePath;
use docsync_core::domain::sync_item::CacheRecord;
use docsync_core::ports::IStateCache;

use crate::filesystem::LocalFileSystem;

/// Compares local content with the State Cache
pub struct ChangeDetector {
    cache: Arc<dyn IStateCache>,
    fs: Arc<LocalFileSystem>,
}

impl ChangeDetector {
    pub fn new(cache: Arc<dyn IStateCache>, fs: Arc<LocalFileSystem>) -> Self {
        Self { cache, fs }
    }

    /// Whether the local file at `path` differs from its cached checksum
    ///
    /// An untracked path, a folder record, a cache failure and a read
    /// failure all count as changed.
    pub async fn local_file_has_changed(&self, path: &RelativePath) -> bool {
        match self.cache.get_record(path).await {
            Ok(Some(record)) => self.differs_from(&record).await,
            Ok(None) => true,
            Err(err) => {
                debug!(path = %path, error = %err, "Cache lookup failed, assuming changed");
                true
            }
        }
    }

    async fn differs_from(&self, record: &CacheRecord) -> bool {
        if record.is_folder {
            return true;
        }
        match self.fs.checksum(&record.path).await {
            Ok(current) => record.checksum.as_ref() != Some(&current),
            Err(err) => {
                debug!(path = %record.path, %err, "Local file unreadable, assuming changed");
                true
            }
        }
    }
}
