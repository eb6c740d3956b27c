//! Per-item failure bookkeeping
//!
//! A [`FailureRecord`] counts failed attempts per operation type for one
//! path. Counters only accumulate while the local modification time stays
//! the same: a newer local edit means the recorded failures no longer
//! describe the current content, so they start over from zero.
//!
//! The record also keeps the remote timestamp of the version the failed
//! attempt was working against. A suspended item with no local copy has no
//! mtime to change, so a newer remote version is what releases it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::RelativePath;

/// The operation type a failure counter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Creating a new remote object from local content
    Upload,
    /// Fetching remote content into the local tree
    Download,
    /// Replacing the content of an existing remote object
    Change,
    /// Removing an item on either side
    Delete,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        OperationKind::Upload,
        OperationKind::Download,
        OperationKind::Change,
        OperationKind::Delete,
    ];

    /// Storage column prefix (`upload`, `download`, `change`, `delete`)
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Upload => "upload",
            OperationKind::Download => "download",
            OperationKind::Change => "change",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(OperationKind::Upload),
            "download" => Ok(OperationKind::Download),
            "change" => Ok(OperationKind::Change),
            "delete" => Ok(OperationKind::Delete),
            other => Err(DomainError::ValidationFailed(format!(
                "Unknown operation kind: {other}"
            ))),
        }
    }
}

/// Counter and last error message for one operation type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCounter {
    pub count: u32,
    pub message: Option<String>,
}

/// Failed attempts recorded against one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub path: RelativePath,
    /// Local modification time the counters accumulated against
    pub last_local_modification: Option<DateTime<Utc>>,
    /// Remote timestamp of the version the last attempt worked against
    #[serde(default)]
    pub last_remote_modification: Option<DateTime<Utc>>,
    pub upload: FailureCounter,
    pub download: FailureCounter,
    pub change: FailureCounter,
    pub delete: FailureCounter,
}

impl FailureRecord {
    /// A record with all counters at zero
    pub fn new(path: RelativePath, last_local_modification: Option<DateTime<Utc>>) -> Self {
        Self {
            path,
            last_local_modification,
            last_remote_modification: None,
            upload: FailureCounter::default(),
            download: FailureCounter::default(),
            change: FailureCounter::default(),
            delete: FailureCounter::default(),
        }
    }

    pub fn counter(&self, kind: OperationKind) -> &FailureCounter {
        match kind {
            OperationKind::Upload => &self.upload,
            OperationKind::Download => &self.download,
            OperationKind::Change => &self.change,
            OperationKind::Delete => &self.delete,
        }
    }

    pub fn counter_mut(&mut self, kind: OperationKind) -> &mut FailureCounter {
        match kind {
            OperationKind::Upload => &mut self.upload,
            OperationKind::Download => &mut self.download,
            OperationKind::Change => &mut self.change,
            OperationKind::Delete => &mut self.delete,
        }
    }

    /// Whether the counters still describe content modified at `local_mtime`
    pub fn matches(&self, local_mtime: Option<DateTime<Utc>>) -> bool {
        self.last_local_modification == local_mtime
    }

    /// Apply one failed attempt and return the new counter value
    ///
    /// Counters are reset first when `local_mtime` differs from the stored
    /// modification time. `floor` raises the counter to at least that value,
    /// which is how an item gets suspended outright.
    pub fn record(
        &mut self,
        local_mtime: Option<DateTime<Utc>>,
        kind: OperationKind,
        message: &str,
        floor: Option<u32>,
    ) -> u32 {
        if !self.matches(local_mtime) {
            *self = Self::new(self.path.clone(), local_mtime);
        }

        let counter = self.counter_mut(kind);
        counter.count = counter.count.saturating_add(1).max(floor.unwrap_or(0));
        counter.message = Some(message.to_string());
        counter.count
    }

    /// Whether any counter at the current mtime reached `ceiling`
    pub fn is_quarantined(&self, local_mtime: Option<DateTime<Utc>>, ceiling: u32) -> bool {
        self.matches(local_mtime)
            && OperationKind::ALL
                .iter()
                .any(|kind| self.counter(*kind).count >= ceiling)
    }

    /// Whether the repository now reports a different version than the one
    /// the failures were recorded against
    ///
    /// Unknown timestamps on either side never count as a new version.
    pub fn superseded_by(&self, remote_modified_at: Option<DateTime<Utc>>) -> bool {
        matches!(
            (self.last_remote_modification, remote_modified_at),
            (Some(seen), Some(now)) if seen != now
        )
    }

    /// The most informative message across all counters
    pub fn last_message(&self) -> Option<&str> {
        OperationKind::ALL
            .iter()
            .map(|kind| self.counter(*kind))
            .filter(|c| c.count > 0)
            .max_by_key(|c| c.count)
            .and_then(|c| c.message.as_deref())
    }
}
