//! Sync observer port (driven/secondary port)
//!
//! The engine reports activity and transfer progress to whoever presents it
//! (tray icon, status bar, telemetry). It never interprets the replies.
//!
//! ## Design Notes
//!
//! - Callbacks are synchronous and fire-and-forget. They run on worker
//!   tasks, so implementations must be thread-safe and must not block.
//! - Every method has an empty default body so observers only implement
//!   what they display.

use serde::{Deserialize, Serialize};

use crate::domain::newtypes::RelativePath;

/// Direction of a content transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Progress of a single transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub path: RelativePath,
    pub direction: TransferDirection,
    /// Bytes on the destination side, including resumed bytes
    pub bytes_done: u64,
    /// Total size, when known
    pub total_bytes: Option<u64>,
    /// Bytes per second since the transfer (re)started
    pub rate_bytes_per_sec: f64,
}

impl TransferProgress {
    /// Completion percentage (0.0 to 100.0), when the total is known
    pub fn percent(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(100.0),
            Some(total) => Some((self.bytes_done as f64 / total as f64 * 100.0).min(100.0)),
            None => None,
        }
    }
}

/// Port trait for activity and progress notifications
pub trait ISyncObserver: Send + Sync {
    /// A unit of crawl or transfer work started
    fn activity_started(&self) {}

    /// The unit of work started last has finished
    fn activity_stopped(&self) {}

    /// A transfer made progress
    fn transfer_progress(&self, _progress: &TransferProgress) {}

    /// An item failed; `suspended` is set once it will no longer be retried
    fn item_failed(&self, _path: &RelativePath, _message: &str, _suspended: bool) {}
}

/// Observer that ignores every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl ISyncObserver for NullObserver {}
