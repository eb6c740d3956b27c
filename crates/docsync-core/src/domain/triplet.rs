//! Sync triplets and the reducer
//!
//! A [`SyncTriplet`] is the three-way comparison of local state, cached
//! baseline and remote state for one path. It is computed fresh on every
//! pass and discarded once its action has run.
//!
//! [`reduce`] turns a triplet into an [`Action`]. It is a pure function:
//!
//! | local == cache | remote == cache | result            |
//! |----------------|-----------------|-------------------|
//! | true           | true            | NoOp              |
//! | true           | false           | remote-side rule  |
//! | false          | true            | local-side rule   |
//! | false          | false           | Conflict          |
//!
//! - remote-side rule: remote gone → DeleteLocal, else Download
//! - local-side rule (bidirectional only): local present → Upload,
//!   else DeleteRemote
//! - conflict with both sides gone → RemoveDbRecord

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{Checksum, RemoteId};
use super::sync_item::{CacheRecord, SyncItem};

// ============================================================================
// Observations
// ============================================================================

/// What the local filesystem shows for a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalObservation {
    /// Nothing at the path
    Absent,
    /// A directory
    Folder,
    /// A regular file; `checksum` is `None` when the content could not be read
    File { checksum: Option<Checksum> },
}

impl LocalObservation {
    pub fn exists(&self) -> bool {
        !matches!(self, LocalObservation::Absent)
    }
}

/// Remote attributes relevant to change detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteState {
    pub remote_id: RemoteId,
    pub is_folder: bool,
    pub modified_at: DateTime<Utc>,
    /// Server-reported digest, when the repository exposes one
    pub checksum: Option<Checksum>,
}

/// What the repository shows for a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteObservation {
    /// The object is gone, or was never there
    Absent,
    /// The object as currently reported by the repository
    Present(RemoteState),
    /// Not queried this pass; assumed identical to the cached baseline
    AssumedUnchanged,
}

// ============================================================================
// SyncTriplet
// ============================================================================

/// Derived comparison of local, cached and remote state for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTriplet {
    pub item: SyncItem,
    pub local_exists: bool,
    pub remote_exists: bool,
    /// Local content matches the cached checksum
    pub local_equals_cache: bool,
    /// Remote id and timestamp match the cached baseline
    pub remote_equals_cache: bool,
    /// A folder deletion postponed until its children resolved
    pub is_delayed: bool,
}

impl SyncTriplet {
    /// Build a triplet from one cache lookup plus live observations
    ///
    /// Without a record, each side "equals the cache" exactly when it is
    /// absent. With a record:
    /// - local equality requires the same kind and, for files, a readable
    ///   checksum equal to the stored one; an unreadable file counts as
    ///   changed
    /// - remote equality requires the same object id and kind and, for
    ///   files, the same modification timestamp
    pub fn observe(
        item: SyncItem,
        record: Option<&CacheRecord>,
        local: &LocalObservation,
        remote: &RemoteObservation,
    ) -> Self {
        let local_exists = local.exists();
        let local_equals_cache = match record {
            None => !local_exists,
            Some(record) => match local {
                LocalObservation::Absent => false,
                LocalObservation::Folder => record.is_folder,
                LocalObservation::File { checksum } => {
                    !record.is_folder && checksum.is_some() && *checksum == record.checksum
                }
            },
        };

        let (remote_exists, remote_equals_cache) = match remote {
            RemoteObservation::AssumedUnchanged => (record.is_some(), true),
            RemoteObservation::Absent => (false, record.is_none()),
            RemoteObservation::Present(state) => {
                let equal = match record {
                    None => false,
                    Some(record) => {
                        record.remote_id == state.remote_id
                            && record.is_folder == state.is_folder
                            && (state.is_folder || record.remote_modified_at == state.modified_at)
                    }
                };
                (true, equal)
            }
        };

        Self {
            item,
            local_exists,
            remote_exists,
            local_equals_cache,
            remote_equals_cache,
            is_delayed: false,
        }
    }

    /// The state after conflict resolution moved the local copy aside and
    /// cleared the record: local absent, nothing cached
    pub fn after_local_rename(&self) -> Self {
        Self {
            item: self.item.clone(),
            local_exists: false,
            remote_exists: self.remote_exists,
            local_equals_cache: true,
            remote_equals_cache: !self.remote_exists,
            is_delayed: self.is_delayed,
        }
    }

    /// The state after a baseline record was written for an item that
    /// exists identically on both sides
    pub fn after_baseline(&self) -> Self {
        Self {
            local_equals_cache: true,
            remote_equals_cache: true,
            ..self.clone()
        }
    }

    /// Shorthand for [`reduce`]
    pub fn reduce(&self, bidirectional: bool) -> Action {
        reduce(self, bidirectional)
    }
}

// ============================================================================
// Action + reducer
// ============================================================================

/// The side effect that restores consistency for one triplet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Already consistent
    NoOp,
    /// Push local content (or create the remote folder)
    Upload,
    /// Fetch remote content (or create the local folder)
    Download,
    /// Remove the local entry
    DeleteLocal,
    /// Remove the remote object
    DeleteRemote,
    /// Both sides diverged and at least one still exists
    Conflict,
    /// Both sides are gone; only the record remains
    RemoveDbRecord,
}

impl Action {
    /// Whether the action removes an entry on either side
    pub fn is_deletion(&self) -> bool {
        matches!(self, Action::DeleteLocal | Action::DeleteRemote)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::NoOp => "noop",
            Action::Upload => "upload",
            Action::Download => "download",
            Action::DeleteLocal => "delete_local",
            Action::DeleteRemote => "delete_remote",
            Action::Conflict => "conflict",
            Action::RemoveDbRecord => "remove_db_record",
        };
        f.write_str(s)
    }
}

/// Decide the action for a triplet
///
/// Without `bidirectional`, local-side divergence is ignored: the remote is
/// authoritative and local edits are never pushed.
pub fn reduce(triplet: &SyncTriplet, bidirectional: bool) -> Action {
    match (triplet.local_equals_cache, triplet.remote_equals_cache) {
        (true, true) => Action::NoOp,
        (true, false) => {
            if triplet.remote_exists {
                Action::Download
            } else {
                Action::DeleteLocal
            }
        }
        (false, true) => {
            if !bidirectional {
                Action::NoOp
            } else if triplet.local_exists {
                Action::Upload
            } else {
                Action::DeleteRemote
            }
        }
        (false, false) => {
            if !triplet.local_exists && !triplet.remote_exists {
                Action::RemoveDbRecord
            } else {
                Action::Conflict
            }
        }
    }
}
