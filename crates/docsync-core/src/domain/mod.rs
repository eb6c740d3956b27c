//! Domain entities and business logic
//!
//! This module contains the core domain types for docsync:
//! - Newtypes for normalized paths, remote identifiers and checksums
//! - Sync items and their cached baselines
//! - Failure bookkeeping per path and operation type
//! - Sync triplets and the pure reducer deciding each action
//! - Domain-specific error types

pub mod errors;
pub mod failure;
pub mod newtypes;
pub mod sync_item;
pub mod triplet;

// Re-export commonly used types
pub use errors::DomainError;
pub use failure::{FailureCounter, FailureRecord, OperationKind};
pub use newtypes::*;
pub use sync_item::{CacheRecord, ItemMetadata, SyncItem};
pub use triplet::{reduce, Action, LocalObservation, RemoteObservation, RemoteState, SyncTriplet};
