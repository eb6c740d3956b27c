//! docsync Sync - Reconciliation engine
//!
//! Provides:
//! - Three-way reconciliation of local files, cached baselines and a remote
//!   document repository
//! - Full-crawl and change-feed remote discovery
//! - Resumable downloads through `.partial` files
//! - Per-path failure counters with quarantine
//!
//! ## Modules
//!
//! - [`engine`] - Orchestrator running one sync pass
//! - [`change_source`] - Remote discovery (full crawl or incremental)
//! - [`executor`] - Side effects of one action plus failure policy
//! - [`transfer`] - Resumable content download
//! - [`filesystem`] - Local filesystem adapter (walk, observe, SHA-256)
//! - [`detector`] - Local dirtiness check against the cache
//! - [`ignore`] - Ignore rules for VCS, lock and backup artifacts
//! - [`remote`] - Repository session wrapper enforcing call timeouts

pub mod change_source;
pub mod detector;
pub mod engine;
pub mod executor;
pub mod filesystem;
pub mod ignore;
pub mod remote;
pub mod transfer;

use std::io::ErrorKind;

use thiserror::Error;

use docsync_conflict::ConflictError;
use docsync_core::{domain::errors::DomainError, ports::RepositoryError};

pub use engine::{SyncEngine, SyncResult, SyncSettings};

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during local file operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The remote repository rejected or failed a call
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Transferred content does not match what the repository announced
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// A domain-level error propagated from docsync-core
    #[error("Domain error: {0}")]
    DomainError(#[from] DomainError),

    /// Moving a conflicting local copy aside failed
    #[error("Conflict error: {0}")]
    Conflict(#[from] ConflictError),

    /// The state cache failed
    #[error("State cache error: {0:#}")]
    Cache(#[from] anyhow::Error),

    /// The pass was cancelled between dispatches
    #[error("Sync pass cancelled")]
    Cancelled,
}

/// How a failure is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Counter incremented, retried next pass
    Transient,
    /// Surfaced to the operator, item suspended
    Permission,
    /// The object is gone; treated as an implicit delete
    NotFound,
    /// Item quarantined
    Integrity,
    /// The pass is aborted
    Connection,
}

impl SyncError {
    /// Classify the error for the failure policy
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::IoError(e) => match e.kind() {
                ErrorKind::PermissionDenied => ErrorClass::Permission,
                _ => ErrorClass::Transient,
            },
            SyncError::Repository(e) => match e {
                RepositoryError::PermissionDenied(_) => ErrorClass::Permission,
                RepositoryError::ObjectNotFound(_) => ErrorClass::NotFound,
                RepositoryError::ConnectionFailed(_) => ErrorClass::Connection,
                RepositoryError::ServerRuntime(_) | RepositoryError::Timeout(_) => {
                    ErrorClass::Transient
                }
            },
            SyncError::Integrity(_) | SyncError::DomainError(_) => ErrorClass::Integrity,
            SyncError::Conflict(ConflictError::NoFreeName(_)) => ErrorClass::Integrity,
            SyncError::Conflict(_) | SyncError::Cache(_) => ErrorClass::Transient,
            SyncError::Cancelled => ErrorClass::Connection,
        }
    }

    /// Whether the error is the repository reporting a missing object
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Repository(RepositoryError::ObjectNotFound(_)))
    }
}
