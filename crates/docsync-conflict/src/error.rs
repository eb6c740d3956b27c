//! Error types for conflict resolution

use thiserror::Error;

/// Errors that can occur during conflict resolution
#[derive(Debug, Error)]
pub enum ConflictError {
    /// Renaming the local copy failed
    #[error("resolution failed: {0}")]
    ResolutionFailed(String),

    /// No free `name (n)` sibling could be found
    #[error("no free conflict name for {0}")]
    NoFreeName(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
