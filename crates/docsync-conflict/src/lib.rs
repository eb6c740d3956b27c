//! docsync Conflict - Divergent edit resolution
//!
//! Provides:
//! - `name (n)` sibling naming for conflict copies
//! - Local-rename resolution that keeps the remote copy authoritative
//!
//! A conflict is resolved by moving the local copy aside and forgetting the
//! cached baseline. The next evaluation then sees the local side absent and
//! downloads the remote copy under the original name, while the renamed local
//! copy is uploaded as a new item on a later pass.

pub mod error;
pub mod namer;
pub mod resolver;

pub use error::ConflictError;
pub use namer::ConflictNamer;
pub use resolver::{ConflictOutcome, ConflictResolver};
