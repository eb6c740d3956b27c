//! Local filesystem adapter (secondary/driven adapter)
//!
//! All local I/O of the engine goes through [`LocalFileSystem`], which maps
//! normalized [`RelativePath`]s onto the synchronized root using `tokio::fs`.
//!
//! ## Design Decisions
//!
//! - **SHA-256 checksums**: Content is hashed in 64 KiB chunks so large files
//!   never sit in memory; the digest is lowercase hex.
//! - **Parents first**: [`LocalFileSystem::walk`] is breadth-first, so every
//!   folder is listed before its children.
//! - **No symlinks**: Symbolic links are skipped by the walk and never
//!   followed.
//! - **Writes stay under the root**: every path is rebuilt from the prefix,
//!   and normalized paths cannot contain `..`.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument, warn};

use docsync_core::domain::{
    newtypes::{Checksum, PathPrefix, RelativePath},
    triplet::LocalObservation,
};

use crate::ignore::{IgnoreRules, PARTIAL_SUFFIX};
use crate::SyncError;

/// Read buffer size used while hashing
const HASH_CHUNK_SIZE: usize = 64 * 1024;

// ============================================================================
// Types
// ============================================================================

/// One entry found by the local walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub path: RelativePath,
    pub is_folder: bool,
}

/// Current local state of one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalState {
    pub observation: LocalObservation,
    /// Modification time, `None` when the path does not exist
    pub modified_at: Option<DateTime<Utc>>,
}

impl LocalState {
    fn absent() -> Self {
        Self {
            observation: LocalObservation::Absent,
            modified_at: None,
        }
    }
}

// ============================================================================
// Hashing
// ============================================================================

/// Wraps a finished digest into a [`Checksum`]
pub fn checksum_from_hasher(hasher: Sha256) -> Result<Checksum, SyncError> {
    Ok(Checksum::new(format!("{:x}", hasher.finalize()))?)
}

/// SHA-256 of an in-memory buffer
pub fn hash_bytes(data: &[u8]) -> Result<Checksum, SyncError> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    checksum_from_hasher(hasher)
}

/// Feeds up to `limit` bytes of the file at `path` into `hasher`
///
/// Returns the number of bytes hashed, which is smaller than `limit` when
/// the file is shorter.
pub async fn hash_file_prefix(
    path: &Path,
    hasher: &mut Sha256,
    limit: u64,
) -> std::io::Result<u64> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = file.take(limit);
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    Ok(total)
}

/// SHA-256 of a whole file
pub async fn hash_file(path: &Path) -> Result<Checksum, SyncError> {
    let mut hasher = Sha256::new();
    hash_file_prefix(path, &mut hasher, u64::MAX).await?;
    checksum_from_hasher(hasher)
}

// ============================================================================
// LocalFileSystem
// ============================================================================

/// Adapter between normalized paths and the real filesystem
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    prefix: PathPrefix,
    ignore: IgnoreRules,
}

impl LocalFileSystem {
    /// Create a new `LocalFileSystem` rooted at `prefix`.
    #[must_use]
    pub fn new(prefix: PathPrefix, ignore: IgnoreRules) -> Self {
        Self { prefix, ignore }
    }

    pub fn prefix(&self) -> &PathPrefix {
        &self.prefix
    }

    pub fn ignore_rules(&self) -> &IgnoreRules {
        &self.ignore
    }

    /// Absolute location of a normalized path
    pub fn absolute(&self, path: &RelativePath) -> PathBuf {
        self.prefix.denormalize(path)
    }

    /// Absolute location of the in-flight download file of `path`
    pub fn partial_path(&self, path: &RelativePath) -> PathBuf {
        let mut p = self.absolute(path).into_os_string();
        p.push(PARTIAL_SUFFIX);
        PathBuf::from(p)
    }

    /// Recursively list the synchronized root, parents before children
    ///
    /// Ignored entries and symbolic links are skipped, and so is the content
    /// of ignored folders. Entries with non UTF-8 names are logged and
    /// skipped.
    #[instrument(skip(self), fields(root = %self.prefix))]
    pub async fn walk(&self) -> Result<Vec<LocalEntry>, SyncError> {
        let mut entries = Vec::new();
        let mut queue = VecDeque::from([RelativePath::root()]);

        while let Some(dir) = queue.pop_front() {
            let mut read_dir = match tokio::fs::read_dir(self.absolute(&dir)).await {
                Ok(rd) => rd,
                // Removed between listing and descending
                Err(e) if e.kind() == ErrorKind::NotFound && !dir.is_root() => continue,
                Err(e) => return Err(e.into()),
            };

            let mut children = Vec::new();
            while let Some(entry) = read_dir.next_entry().await? {
                let file_name = entry.file_name();
                let Some(name) = file_name.to_str() else {
                    warn!(path = ?entry.path(), "Skipping non UTF-8 file name");
                    continue;
                };
                if self.ignore.is_ignored_name(name) {
                    continue;
                }
                let path = match dir.join(name) {
                    Ok(p) => p,
                    Err(err) => {
                        warn!(path = ?entry.path(), %err, "Skipping invalid path");
                        continue;
                    }
                };
                if self.ignore.is_ignored(&path) {
                    continue;
                }

                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    children.push(LocalEntry {
                        path,
                        is_folder: true,
                    });
                } else if file_type.is_file() {
                    children.push(LocalEntry {
                        path,
                        is_folder: false,
                    });
                } else {
                    debug!(path = %path, "Skipping special file or symlink");
                }
            }

            children.sort_by(|a, b| a.path.cmp(&b.path));
            for child in children {
                if child.is_folder {
                    queue.push_back(child.path.clone());
                }
                entries.push(child);
            }
        }

        debug!(entries = entries.len(), "Local walk complete");
        Ok(entries)
    }

    /// Stat a path and hash it when it is a file
    ///
    /// An unreadable file is reported with no checksum, which the triplet
    /// treats as changed.
    pub async fn observe(&self, path: &RelativePath) -> Result<LocalState, SyncError> {
        let absolute = self.absolute(path);
        let metadata = match tokio::fs::symlink_metadata(&absolute).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LocalState::absent()),
            Err(e) => return Err(e.into()),
        };

        let modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);

        let observation = if metadata.is_dir() {
            LocalObservation::Folder
        } else if metadata.is_file() {
            let checksum = match hash_file(&absolute).await {
                Ok(sum) => Some(sum),
                Err(err) => {
                    debug!(path = %path, %err, "Local file unreadable");
                    None
                }
            };
            LocalObservation::File { checksum }
        } else {
            return Ok(LocalState::absent());
        };

        Ok(LocalState {
            observation,
            modified_at,
        })
    }

    /// Kind of the entry at `path`: `Some(true)` for a folder, `Some(false)`
    /// for a regular file, `None` for anything else or nothing
    pub async fn entry_kind(&self, path: &RelativePath) -> Result<Option<bool>, SyncError> {
        match tokio::fs::symlink_metadata(self.absolute(path)).await {
            Ok(m) if m.is_dir() => Ok(Some(true)),
            Ok(m) if m.is_file() => Ok(Some(false)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Move an entry to `to`, creating missing parents
    ///
    /// The `.partial` file of a document moves along with it.
    #[instrument(skip(self), fields(from = %from, to = %to))]
    pub async fn rename(&self, from: &RelativePath, to: &RelativePath) -> Result<(), SyncError> {
        let target = self.absolute(to);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(self.absolute(from), &target).await?;

        match tokio::fs::rename(self.partial_path(from), self.partial_path(to)).await {
            Ok(()) => debug!("partial download moved along"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Modification time of a path, `None` when absent
    pub async fn modified_at(&self, path: &RelativePath) -> Option<DateTime<Utc>> {
        tokio::fs::symlink_metadata(self.absolute(path))
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from)
    }

    /// SHA-256 of a local file
    pub async fn checksum(&self, path: &RelativePath) -> Result<Checksum, SyncError> {
        hash_file(&self.absolute(path)).await
    }

    /// Read a whole local file
    #[instrument(skip(self), fields(path = %path))]
    pub async fn read(&self, path: &RelativePath) -> Result<Bytes, SyncError> {
        let data = tokio::fs::read(self.absolute(path)).await?;
        debug!(bytes = data.len(), "file read complete");
        Ok(Bytes::from(data))
    }

    /// Create a folder and any missing parents
    pub async fn create_dir(&self, path: &RelativePath) -> Result<(), SyncError> {
        tokio::fs::create_dir_all(self.absolute(path)).await?;
        Ok(())
    }

    /// Remove a file; a missing file is not an error
    pub async fn remove_file(&self, path: &RelativePath) -> Result<(), SyncError> {
        match tokio::fs::remove_file(self.absolute(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a stale `.partial` file of `path`, if any
    pub async fn remove_partial(&self, path: &RelativePath) -> Result<(), SyncError> {
        match tokio::fs::remove_file(self.partial_path(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List the names inside a local folder, including ignored ones
    pub async fn list_dir(&self, path: &RelativePath) -> Result<Vec<(String, bool)>, SyncError> {
        let mut read_dir = tokio::fs::read_dir(self.absolute(path)).await?;
        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                // Not representable; keep the folder non-empty
                names.push((String::new(), false));
                continue;
            };
            let is_dir = entry.file_type().await?.is_dir();
            names.push((name, is_dir));
        }
        Ok(names)
    }

    /// Remove a folder if it is empty
    ///
    /// Returns `false` when the folder still has entries. A missing folder
    /// counts as removed.
    pub async fn remove_dir_if_empty(&self, path: &RelativePath) -> Result<bool, SyncError> {
        let absolute = self.absolute(path);
        let mut read_dir = match tokio::fs::read_dir(&absolute).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };
        if read_dir.next_entry().await?.is_some() {
            return Ok(false);
        }
        match tokio::fs::remove_dir(&absolute).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================
