//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IRepositoryClient`] / [`IRepositorySession`] - Remote document repository
//! - [`IStateCache`] - Persistent last-synchronized state
//! - [`ISyncObserver`] - Activity and transfer progress notifications

pub mod observer;
pub mod repository;
pub mod state_cache;

pub use observer::{ISyncObserver, NullObserver, TransferDirection, TransferProgress};
pub use repository::{
    ChangeEvent, ChangeKind, ChangePage, ContentStream, IRepositoryClient, IRepositorySession,
    RepoItem, RepositoryError,
};
pub use state_cache::{IStateCache, RecordCounts};
