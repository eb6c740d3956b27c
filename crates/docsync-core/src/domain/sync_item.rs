//! SyncItem and CacheRecord domain entities
//!
//! A [`SyncItem`] names one file or folder by its normalized path. Its
//! [`CacheRecord`] is the last-synchronized baseline: what the local and
//! remote sides looked like the last time both agreed.
//!
//! ## Invariants
//!
//! - A path has at most one record, either a file record or a folder record.
//! - `remote_modified_at` is always UTC; the store has no timezone concept.
//! - File records carry the checksum of the bytes last synchronized;
//!   folder records carry none.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{Checksum, RelativePath, RemoteId};

// ============================================================================
// SyncItem
// ============================================================================

/// One file or folder under the synchronized root
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncItem {
    /// Normalized path relative to the root
    pub path: RelativePath,
    /// Whether the item is a folder
    pub is_folder: bool,
}

impl SyncItem {
    /// A file item
    pub fn file(path: RelativePath) -> Self {
        Self {
            path,
            is_folder: false,
        }
    }

    /// A folder item
    pub fn folder(path: RelativePath) -> Self {
        Self {
            path,
            is_folder: true,
        }
    }
}

impl fmt::Display for SyncItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_folder {
            write!(f, "{}/", self.path)
        } else {
            write!(f, "{}", self.path)
        }
    }
}

// ============================================================================
// ItemMetadata
// ============================================================================

/// Serialized key/value attributes reported by the repository
///
/// Well-known keys have typed accessors; anything else the server reports
/// is kept verbatim so it survives a round trip through the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemMetadata(BTreeMap<String, String>);

impl ItemMetadata {
    pub const CREATED_BY: &'static str = "createdBy";
    pub const VERSION_LABEL: &'static str = "versionLabel";
    pub const MIME_TYPE: &'static str = "contentStreamMimeType";
    pub const IMMUTABLE: &'static str = "isImmutable";

    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn created_by(&self) -> Option<&str> {
        self.get(Self::CREATED_BY)
    }

    pub fn version_label(&self) -> Option<&str> {
        self.get(Self::VERSION_LABEL)
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.get(Self::MIME_TYPE)
    }

    /// Whether the repository flags the object as read-only
    pub fn is_immutable(&self) -> bool {
        self.get(Self::IMMUTABLE)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ============================================================================
// CacheRecord
// ============================================================================

/// The last-synchronized baseline of one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Normalized path (primary key)
    pub path: RelativePath,
    /// Whether the record lives in the folder set
    pub is_folder: bool,
    /// Repository object id as of the last sync
    pub remote_id: RemoteId,
    /// Remote modification timestamp as of the last sync
    pub remote_modified_at: DateTime<Utc>,
    /// Digest of the synchronized file bytes (`None` for folders)
    pub checksum: Option<Checksum>,
    /// Remote attributes as of the last sync
    pub metadata: ItemMetadata,
    /// Remote timestamp of a download that started but has not been
    /// finalized yet; read-only, maintained by the download bookkeeping
    pub last_download_modified_at: Option<DateTime<Utc>>,
}

impl CacheRecord {
    /// Baseline of a synchronized file
    pub fn file(
        path: RelativePath,
        remote_id: RemoteId,
        remote_modified_at: DateTime<Utc>,
        checksum: Checksum,
    ) -> Self {
        Self {
            path,
            is_folder: false,
            remote_id,
            remote_modified_at,
            checksum: Some(checksum),
            metadata: ItemMetadata::new(),
            last_download_modified_at: None,
        }
    }

    /// Baseline of a synchronized folder
    pub fn folder(
        path: RelativePath,
        remote_id: RemoteId,
        remote_modified_at: DateTime<Utc>,
    ) -> Self {
        Self {
            path,
            is_folder: true,
            remote_id,
            remote_modified_at,
            checksum: None,
            metadata: ItemMetadata::new(),
            last_download_modified_at: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ItemMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The item this record describes
    pub fn item(&self) -> SyncItem {
        SyncItem {
            path: self.path.clone(),
            is_folder: self.is_folder,
        }
    }
}
