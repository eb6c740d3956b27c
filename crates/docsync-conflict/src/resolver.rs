//! Conflict resolution executor
//!
//! Moves the local copy of a conflicting item to a free `name (n)` sibling
//! and clears its cached baseline. The remote copy stays authoritative under
//! the original path: after resolution the item looks locally absent and
//! uncached, so re-evaluation downloads it.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use docsync_core::{
    domain::{
        newtypes::{PathPrefix, RelativePath},
        sync_item::SyncItem,
    },
    ports::IStateCache,
};

use crate::{error::ConflictError, namer::ConflictNamer};

/// What a resolution did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictOutcome {
    /// Path of the conflicting item
    pub original: RelativePath,
    /// Where the local copy was moved, `None` when there was no local copy
    pub renamed_to: Option<RelativePath>,
}

/// Applies the local-rename resolution with real file operations
pub struct ConflictResolver {
    cache: Arc<dyn IStateCache>,
    prefix: PathPrefix,
}

impl ConflictResolver {
    pub fn new(cache: Arc<dyn IStateCache>, prefix: PathPrefix) -> Self {
        Self { cache, prefix }
    }

    /// Resolve one conflict
    ///
    /// # Errors
    ///
    /// `ConflictError::ResolutionFailed` if the local copy cannot be moved,
    /// `ConflictError::NoFreeName` if every sibling name is taken and
    /// `ConflictError::Storage` if the record cannot be cleared. On error
    /// the record is left untouched.
    #[tracing::instrument(skip(self, item), fields(path = %item.path))]
    pub async fn resolve(&self, item: &SyncItem) -> Result<ConflictOutcome, ConflictError> {
        if item.path.is_root() {
            return Err(ConflictError::ResolutionFailed(
                "the synchronized root cannot conflict".to_string(),
            ));
        }

        let local_path = self.prefix.denormalize(&item.path);
        let renamed_to = match tokio::fs::symlink_metadata(&local_path).await {
            Ok(meta) => Some(self.move_aside(&item.path, &local_path, meta.is_dir()).await?),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                return Err(ConflictError::ResolutionFailed(format!(
                    "stat {}: {e}",
                    local_path.display()
                )))
            }
        };

        self.cache.remove_record(&item.path).await?;

        match &renamed_to {
            Some(copy) => info!(conflict_copy = %copy, "Conflict resolved: local copy moved aside"),
            None => debug!("Conflict resolved: no local copy, record cleared"),
        }

        Ok(ConflictOutcome {
            original: item.path.clone(),
            renamed_to,
        })
    }

    /// Rename the local entry to the first free `name (n)` sibling
    async fn move_aside(
        &self,
        path: &RelativePath,
        local_path: &Path,
        is_dir: bool,
    ) -> Result<RelativePath, ConflictError> {
        let parent_dir = local_path
            .parent()
            .ok_or_else(|| ConflictError::ResolutionFailed(format!("{path} has no parent")))?;

        let siblings = sibling_names(parent_dir).await?;
        let new_name = ConflictNamer::generate_unique(path.file_name(), is_dir, |candidate| {
            siblings.contains(candidate)
        })
        .ok_or_else(|| ConflictError::NoFreeName(path.to_string()))?;

        let new_path = path
            .with_file_name(&new_name)
            .map_err(|e| ConflictError::ResolutionFailed(format!("conflict name: {e}")))?;

        tokio::fs::rename(local_path, self.prefix.denormalize(&new_path))
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("rename local: {e}")))?;

        Ok(new_path)
    }
}

/// Names already present in `dir`, symlinks included
async fn sibling_names(dir: &Path) -> Result<HashSet<String>, ConflictError> {
    let listing_failed = |e: std::io::Error| {
        ConflictError::ResolutionFailed(format!("list {}: {e}", dir.display()))
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(listing_failed)?;

    let mut names = HashSet::new();
    while let Some(entry) = entries.next_entry().await.map_err(listing_failed)? {
        names.insert(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}
