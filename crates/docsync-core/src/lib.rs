//! docsync Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `RelativePath`, `CacheRecord`, `SyncTriplet`, `FailureRecord`
//! - **Reconciliation rules** - `reduce` maps a triplet onto one `Action`
//! - **Port definitions** - Traits for adapters: `IRepositorySession`, `IStateCache`, `ISyncObserver`
//! - **Configuration** - YAML config with defaults and validation
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no I/O.
//! Ports define trait interfaces that adapter crates implement; the sync
//! crate orchestrates domain rules through them.

pub mod config;
pub mod domain;
pub mod ports;
