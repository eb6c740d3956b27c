//! Integration tests for docsync-sync
//!
//! Runs complete sync passes against an in-memory document repository, a
//! temporary local root and an in-memory State Cache, and verifies the
//! resulting state on all three sides.

mod common;

mod test_change_source;
mod test_failures;
mod test_reconcile;
mod test_transfer;
