//! Remote repository port (driven/secondary port)
//!
//! This module defines the abstract client of a hierarchical document
//! repository: folders, documents, content streams and a change feed. The
//! concrete protocol binding lives outside this workspace; the engine only
//! depends on these traits.
//!
//! ## Design Notes
//!
//! - Unlike the other ports, failures are typed ([`RepositoryError`]) rather
//!   than `anyhow`: the executor must tell a missing object from a refused
//!   one from a dead connection.
//! - [`IRepositoryClient::connect`] yields a shared [`IRepositorySession`].
//!   Sessions must accept concurrent calls for *different* paths; the
//!   engine never mutates one path from two workers at once.
//! - [`RepoItem`] and [`ChangeEvent`] are port-level DTOs, not domain
//!   entities.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::newtypes::{ChangeCursor, Checksum, RelativePath, RemoteId, RemotePath};
use crate::domain::sync_item::{CacheRecord, ItemMetadata};
use crate::domain::triplet::RemoteState;

// ============================================================================
// RepositoryError
// ============================================================================

/// Typed failures surfaced by a repository client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    /// The credentials lack the rights for this operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The object does not exist (or no longer exists)
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// The session could not be established or was lost
    #[error("Connection failure: {0}")]
    ConnectionFailed(String),

    /// The server failed while processing the request
    #[error("Server runtime error: {0}")]
    ServerRuntime(String),

    /// The call did not complete within the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),
}

impl RepositoryError {
    /// Whether continuing the pass is pointless
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, RepositoryError::ConnectionFailed(_))
    }
}

// ============================================================================
// DTOs
// ============================================================================

/// A document or folder as reported by the repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoItem {
    /// Repository object id
    pub id: RemoteId,
    /// Last path segment
    pub name: String,
    /// Full repository path
    pub path: RemotePath,
    /// Whether this item is a folder
    pub is_folder: bool,
    /// Last modification timestamp (UTC)
    pub modified_at: DateTime<Utc>,
    /// Content length in bytes (documents only)
    pub size: Option<u64>,
    /// SHA-256 of the content, when the server exposes one
    pub checksum: Option<Checksum>,
    /// Additional attributes (creator, version label, MIME type, ...)
    pub metadata: ItemMetadata,
}

impl RepoItem {
    /// The attributes the triplet comparison looks at
    pub fn state(&self) -> RemoteState {
        RemoteState {
            remote_id: self.id.clone(),
            is_folder: self.is_folder,
            modified_at: self.modified_at,
            checksum: self.checksum.clone(),
        }
    }

    /// Build the baseline record stored after a successful sync
    ///
    /// `checksum` is the digest of the local bytes that now mirror this
    /// item; it is ignored for folders.
    pub fn to_record(&self, path: RelativePath, checksum: Option<Checksum>) -> CacheRecord {
        CacheRecord {
            path,
            is_folder: self.is_folder,
            remote_id: self.id.clone(),
            remote_modified_at: self.modified_at,
            checksum: if self.is_folder { None } else { checksum },
            metadata: self.metadata.clone(),
            last_download_modified_at: None,
        }
    }
}

/// Type of a change-feed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    /// ACL change; re-evaluated like an update
    Security,
}

/// One entry of the change feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// The object the event refers to
    pub object_id: RemoteId,
    pub kind: ChangeKind,
}

/// One bounded page of the change feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePage {
    pub events: Vec<ChangeEvent>,
    /// Cursor to continue from when `has_more` is set
    pub next_cursor: ChangeCursor,
    /// Whether more events follow
    pub has_more: bool,
}

/// A content stream opened at some byte offset
pub struct ContentStream {
    /// Offset the server actually honoured; 0 when ranges are unsupported
    pub offset: u64,
    /// Total content length, when known
    pub length: Option<u64>,
    /// Body chunks starting at `offset`
    pub chunks: BoxStream<'static, Result<Bytes, RepositoryError>>,
}

impl std::fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStream")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Port trait for opening repository sessions
#[async_trait::async_trait]
pub trait IRepositoryClient: Send + Sync {
    /// Opens a session
    ///
    /// # Errors
    /// `RepositoryError::ConnectionFailed` when the repository is unreachable
    /// or rejects the credentials
    async fn connect(&self) -> Result<Arc<dyn IRepositorySession>, RepositoryError>;
}

/// Port trait for the operations available on an open session
///
/// All paths are absolute repository paths. Implementations map transport
/// failures onto [`RepositoryError`] variants.
#[async_trait::async_trait]
pub trait IRepositorySession: Send + Sync {
    /// Returns the latest change-feed cursor
    async fn get_change_cursor(&self) -> Result<ChangeCursor, RepositoryError>;

    /// Fetches change events after `cursor`
    ///
    /// # Arguments
    /// * `cursor` - Cursor from a previous call or from `get_change_cursor`
    /// * `page_size` - Maximum number of events to return
    async fn get_changes(
        &self,
        cursor: &ChangeCursor,
        page_size: u32,
    ) -> Result<ChangePage, RepositoryError>;

    /// Lists the direct children of a folder
    async fn list_children(&self, path: &RemotePath) -> Result<Vec<RepoItem>, RepositoryError>;

    /// Fetches one object by id
    async fn get_object(&self, id: &RemoteId) -> Result<RepoItem, RepositoryError>;

    /// Fetches one object by path
    async fn get_object_by_path(&self, path: &RemotePath) -> Result<RepoItem, RepositoryError>;

    /// Creates a folder named `name` under `parent`
    async fn create_folder(
        &self,
        parent: &RemotePath,
        name: &str,
    ) -> Result<RepoItem, RepositoryError>;

    /// Creates a document named `name` under `parent` with the given content
    async fn create_document(
        &self,
        parent: &RemotePath,
        name: &str,
        content: Bytes,
    ) -> Result<RepoItem, RepositoryError>;

    /// Replaces the whole content stream of an existing document
    async fn update_content(&self, id: &RemoteId, content: Bytes)
        -> Result<RepoItem, RepositoryError>;

    /// Opens the content stream of a document, starting at `offset` when the
    /// server supports ranges
    async fn get_content(&self, id: &RemoteId, offset: u64)
        -> Result<ContentStream, RepositoryError>;

    /// Deletes a document, or a folder with its whole subtree
    async fn delete(&self, id: &RemoteId, is_folder: bool) -> Result<(), RepositoryError>;
}
