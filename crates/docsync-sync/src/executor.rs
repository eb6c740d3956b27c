//! Action executor
//!
//! Performs the side effect of one reduced [`Action`] and brings the State
//! Cache in line with it. The record of a path is only written once the
//! side effect succeeded; a failed action leaves it untouched.
//!
//! ## Failure policy
//!
//! | Class       | Handling                                                  |
//! |-------------|-----------------------------------------------------------|
//! | Transient   | counter incremented, retried next pass                    |
//! | Permission  | counter raised to the ceiling, item suspended             |
//! | NotFound    | implicit delete where one applies, otherwise transient    |
//! | Integrity   | counter raised to the ceiling, item quarantined           |
//! | Connection  | returned to the caller, which aborts the pass             |
//!
//! Every other failure is absorbed here and reported as
//! [`ExecutionOutcome::Failed`].

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use docsync_core::domain::{
    failure::OperationKind,
    newtypes::{RelativePath, RemotePath},
    sync_item::{CacheRecord, SyncItem},
    triplet::Action,
};
use docsync_core::ports::{
    ISyncObserver, IStateCache, RepoItem, RepositoryError, TransferDirection, TransferProgress,
};

use crate::detector::ChangeDetector;
use crate::filesystem::{hash_bytes, LocalFileSystem};
use crate::ignore::PARTIAL_SUFFIX;
use crate::remote::TimedSession;
use crate::transfer::Downloader;
use crate::{ErrorClass, SyncError};

/// Result of executing one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The side effect happened and the cache reflects it; carries the
    /// action actually performed
    Applied(Action),
    /// Nothing was done this pass
    Skipped(String),
    /// The action failed and the failure was recorded
    Failed { message: String, suspended: bool },
}

/// Executes reduced actions against the local filesystem and the repository
pub struct ActionExecutor {
    session: TimedSession,
    cache: Arc<dyn IStateCache>,
    fs: Arc<LocalFileSystem>,
    detector: ChangeDetector,
    downloader: Downloader,
    observer: Arc<dyn ISyncObserver>,
    remote_root: RemotePath,
    failure_ceiling: u32,
}

impl ActionExecutor {
    pub fn new(
        session: TimedSession,
        cache: Arc<dyn IStateCache>,
        fs: Arc<LocalFileSystem>,
        observer: Arc<dyn ISyncObserver>,
        remote_root: RemotePath,
        failure_ceiling: u32,
    ) -> Self {
        Self {
            detector: ChangeDetector::new(cache.clone(), fs.clone()),
            downloader: Downloader::new(
                session.clone(),
                cache.clone(),
                fs.clone(),
                observer.clone(),
            ),
            session,
            cache,
            fs,
            observer,
            remote_root,
            failure_ceiling,
        }
    }

    /// Execute `action` for `item`
    ///
    /// `record` is the cached baseline and `remote` the remote item when the
    /// change source observed one.
    ///
    /// # Errors
    /// Only connection-class failures are returned; the caller must abort
    /// the pass
    #[instrument(skip(self, record, remote), fields(path = %item.path, action = %action))]
    pub async fn execute(
        &self,
        item: &SyncItem,
        action: Action,
        record: Option<&CacheRecord>,
        remote: Option<&RepoItem>,
    ) -> Result<ExecutionOutcome, SyncError> {
        let result = match action {
            Action::NoOp => return Ok(ExecutionOutcome::Skipped("nothing to do".to_string())),
            Action::Conflict => {
                return Ok(ExecutionOutcome::Skipped(
                    "conflicts are resolved before execution".to_string(),
                ))
            }
            Action::Upload => self.upload(item, record).await,
            Action::Download => self.download(item, remote).await,
            Action::DeleteLocal if item.is_folder => self.delete_local_folder(item).await,
            Action::DeleteLocal => self.delete_local_file(item).await,
            Action::DeleteRemote if item.is_folder => self.delete_remote_folder(item, record).await,
            Action::DeleteRemote => self.delete_remote_file(item, record).await,
            Action::RemoveDbRecord => self.remove_db_record(item).await,
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.report_failure(item, action, record, remote.map(|r| r.modified_at), err)
                    .await
            }
        }
    }

    // ========================================================================
    // Upload
    // ========================================================================

    async fn upload(
        &self,
        item: &SyncItem,
        record: Option<&CacheRecord>,
    ) -> Result<ExecutionOutcome, SyncError> {
        let path = &item.path;
        let (parent, name) = self.remote_parent(path)?;

        // The remote object of another kind has to go first
        let same_kind = match record {
            Some(old) if old.is_folder != item.is_folder => {
                info!(was_folder = old.is_folder, "Item changed kind, replacing remote object");
                self.delete_remote_object(old).await?;
                None
            }
            other => other,
        };

        let (uploaded, checksum) = if item.is_folder {
            (self.session.create_folder(&parent, name).await?, None)
        } else {
            let content = self.fs.read(path).await?;
            let checksum = hash_bytes(&content)?;
            self.observer.activity_started();
            let uploaded = self.upload_content(path, &parent, name, same_kind, content).await;
            self.observer.activity_stopped();
            (uploaded?, Some(checksum))
        };

        self.cache
            .save_record(&uploaded.to_record(path.clone(), checksum))
            .await?;
        self.cache.clear_failures(path).await?;

        info!(id = %uploaded.id, "Uploaded");
        Ok(ExecutionOutcome::Applied(Action::Upload))
    }

    /// Replace the content of the tracked document, or create it
    async fn upload_content(
        &self,
        path: &RelativePath,
        parent: &RemotePath,
        name: &str,
        record: Option<&CacheRecord>,
        content: Bytes,
    ) -> Result<RepoItem, SyncError> {
        let size = content.len() as u64;

        let uploaded = match record {
            Some(old) => match self.session.update_content(&old.remote_id, content.clone()).await {
                Err(RepositoryError::ObjectNotFound(_)) => {
                    debug!(id = %old.remote_id, "Tracked document vanished, creating it again");
                    self.session.create_document(parent, name, content).await?
                }
                other => other?,
            },
            None => self.session.create_document(parent, name, content).await?,
        };

        self.observer.transfer_progress(&TransferProgress {
            path: path.clone(),
            direction: TransferDirection::Upload,
            bytes_done: size,
            total_bytes: Some(size),
            rate_bytes_per_sec: 0.0,
        });
        Ok(uploaded)
    }

    // ========================================================================
    // Download
    // ========================================================================

    async fn download(
        &self,
        item: &SyncItem,
        remote: Option<&RepoItem>,
    ) -> Result<ExecutionOutcome, SyncError> {
        let path = &item.path;
        let remote = match remote {
            Some(remote) => remote.clone(),
            None => {
                match self
                    .session
                    .get_object_by_path(&self.remote_root.resolve(path))
                    .await
                {
                    Ok(remote) => remote,
                    Err(RepositoryError::ObjectNotFound(_)) => {
                        return self.vanished_remotely(item).await
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        if remote.is_folder != item.is_folder {
            self.clear_replaced_local(item).await?;
        }

        if remote.is_folder {
            self.fs.create_dir(path).await?;
            self.cache
                .save_record(&remote.to_record(path.clone(), None))
                .await?;
            debug!("Local folder created");
            return Ok(ExecutionOutcome::Applied(Action::Download));
        }

        match self.downloader.download(path, &remote).await {
            Ok(checksum) => {
                self.cache
                    .complete_download(&remote.to_record(path.clone(), Some(checksum)))
                    .await?;
                self.cache.clear_failures(path).await?;
                info!(id = %remote.id, "Downloaded");
                Ok(ExecutionOutcome::Applied(Action::Download))
            }
            Err(e) if e.is_not_found() => self.vanished_remotely(item).await,
            Err(e) => Err(e),
        }
    }

    /// The remote object disappeared between discovery and transfer
    async fn vanished_remotely(&self, item: &SyncItem) -> Result<ExecutionOutcome, SyncError> {
        info!(path = %item.path, "Remote object gone, deleting local copy instead");
        if item.is_folder {
            self.delete_local_folder(item).await
        } else {
            self.delete_local_file(item).await
        }
    }

    /// Remove the unmodified local entry a remote object of another kind
    /// replaces
    async fn clear_replaced_local(&self, item: &SyncItem) -> Result<(), SyncError> {
        if item.is_folder {
            if !self.fs.remove_dir_if_empty(&item.path).await? {
                return Err(SyncError::Integrity(format!(
                    "{}: remote folder became a document but the local folder is not empty",
                    item.path
                )));
            }
        } else {
            self.fs.remove_file(&item.path).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Deletes
    // ========================================================================

    async fn delete_local_file(&self, item: &SyncItem) -> Result<ExecutionOutcome, SyncError> {
        self.fs.remove_file(&item.path).await?;
        self.fs.remove_partial(&item.path).await?;
        self.cache.remove_record(&item.path).await?;
        info!(path = %item.path, "Deleted local file");
        Ok(ExecutionOutcome::Applied(Action::DeleteLocal))
    }

    /// Remove the tracked, unmodified content of a folder, then the folder
    /// itself if nothing else remains
    ///
    /// The records of the subtree are dropped either way, so leftover local
    /// content is uploaded as new by the next pass.
    async fn delete_local_folder(&self, item: &SyncItem) -> Result<ExecutionOutcome, SyncError> {
        let removed = self.prune_local(&item.path).await?;
        self.cache.remove_record(&item.path).await?;

        if removed {
            info!(path = %item.path, "Deleted local folder");
            Ok(ExecutionOutcome::Applied(Action::DeleteLocal))
        } else {
            warn!(path = %item.path, "Local folder holds untracked or modified content, keeping it");
            Ok(ExecutionOutcome::Skipped(
                "folder still holds local content".to_string(),
            ))
        }
    }

    /// Returns whether the folder at `root` was removed
    async fn prune_local(&self, root: &RelativePath) -> Result<bool, SyncError> {
        // Folders of the subtree, parents first
        let mut folders = vec![root.clone()];
        let mut next = 0;

        while next < folders.len() {
            let folder = folders[next].clone();
            next += 1;

            let entries = match self.fs.list_dir(&folder).await {
                Ok(entries) => entries,
                Err(SyncError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };

            for (name, is_dir) in entries {
                let Ok(child) = folder.join(&name) else {
                    continue;
                };
                if is_dir {
                    folders.push(child);
                } else if name.ends_with(PARTIAL_SUFFIX) {
                    tokio::fs::remove_file(self.fs.absolute(&child)).await?;
                } else if !self.detector.local_file_has_changed(&child).await {
                    self.fs.remove_file(&child).await?;
                    self.cache.remove_record(&child).await?;
                }
            }
        }

        let mut removed = false;
        for folder in folders.iter().rev() {
            removed = self.fs.remove_dir_if_empty(folder).await?;
        }
        Ok(removed)
    }

    async fn remove_db_record(&self, item: &SyncItem) -> Result<ExecutionOutcome, SyncError> {
        self.cache.remove_record(&item.path).await?;
        debug!(path = %item.path, "Dropped moot record");
        Ok(ExecutionOutcome::Applied(Action::RemoveDbRecord))
    }

    async fn delete_remote_file(
        &self,
        item: &SyncItem,
        record: Option<&CacheRecord>,
    ) -> Result<ExecutionOutcome, SyncError> {
        if let Some(record) = record {
            self.delete_remote_object(record).await?;
        }
        self.cache.remove_record(&item.path).await?;
        info!(path = %item.path, "Deleted remote document");
        Ok(ExecutionOutcome::Applied(Action::DeleteRemote))
    }

    /// Delete a remote folder whose local copy is gone
    ///
    /// Skipped when the folder reappeared locally, or when it holds remote
    /// children the cache does not know. In the latter case the records are
    /// dropped so the next pass downloads the folder again.
    async fn delete_remote_folder(
        &self,
        item: &SyncItem,
        record: Option<&CacheRecord>,
    ) -> Result<ExecutionOutcome, SyncError> {
        let path = &item.path;
        if self.fs.observe(path).await?.observation.exists() {
            return Ok(ExecutionOutcome::Skipped(
                "folder exists locally again".to_string(),
            ));
        }
        let Some(record) = record else {
            self.cache.remove_record(path).await?;
            return Ok(ExecutionOutcome::Applied(Action::RemoveDbRecord));
        };

        let children = match self
            .session
            .list_children(&self.remote_root.resolve(path))
            .await
        {
            Ok(children) => children,
            Err(RepositoryError::ObjectNotFound(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        for child in &children {
            let known = self
                .cache
                .find_by_remote_id(&child.id)
                .await?
                .is_some_and(|r| r.path.is_descendant_of(path));
            if !known {
                warn!(
                    path = %path,
                    child = %child.name,
                    "Remote folder holds unknown content, not deleting it"
                );
                self.cache.remove_record(path).await?;
                return Ok(ExecutionOutcome::Skipped(format!(
                    "remote folder holds unknown item {}",
                    child.name
                )));
            }
        }

        self.delete_remote_object(record).await?;
        self.cache.remove_record(path).await?;
        info!(path = %path, "Deleted remote folder");
        Ok(ExecutionOutcome::Applied(Action::DeleteRemote))
    }

    /// Delete the remote object of a record; a missing object is fine
    async fn delete_remote_object(&self, record: &CacheRecord) -> Result<(), SyncError> {
        match self
            .session
            .delete(&record.remote_id, record.is_folder)
            .await
        {
            Ok(()) | Err(RepositoryError::ObjectNotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn remote_parent<'p>(
        &self,
        path: &'p RelativePath,
    ) -> Result<(RemotePath, &'p str), SyncError> {
        let parent = path.parent().ok_or_else(|| {
            SyncError::Integrity("the synchronized root cannot be uploaded".to_string())
        })?;
        Ok((self.remote_root.resolve(&parent), path.file_name()))
    }

    /// Record a failed action according to its error class
    ///
    /// `remote_modified_at` is the remote version the action worked against,
    /// when one was observed.
    ///
    /// # Errors
    /// Returns `err` itself when it is connection-class
    pub async fn report_failure(
        &self,
        item: &SyncItem,
        action: Action,
        record: Option<&CacheRecord>,
        remote_modified_at: Option<DateTime<Utc>>,
        err: SyncError,
    ) -> Result<ExecutionOutcome, SyncError> {
        let class = err.class();
        if class == ErrorClass::Connection {
            error!(path = %item.path, error = %err, "Connection lost, aborting pass");
            return Err(err);
        }

        let kind = match action {
            Action::Upload if record.is_some() => OperationKind::Change,
            Action::Conflict => OperationKind::Change,
            Action::Upload => OperationKind::Upload,
            Action::Download => OperationKind::Download,
            _ => OperationKind::Delete,
        };
        let floor = match class {
            ErrorClass::Permission | ErrorClass::Integrity => Some(self.failure_ceiling),
            _ => None,
        };
        let message = err.to_string();
        let mtime = self.fs.modified_at(&item.path).await;

        let count = match self
            .cache
            .record_failure(&item.path, mtime, remote_modified_at, kind, &message, floor)
            .await
        {
            Ok(count) => count,
            Err(cache_err) => {
                error!(path = %item.path, error = %cache_err, "Failed to record failure");
                floor.unwrap_or(1)
            }
        };
        let suspended = count >= self.failure_ceiling;

        if suspended {
            error!(
                path = %item.path,
                kind = %kind,
                count,
                class = ?class,
                error = %message,
                "Item suspended until it changes"
            );
        } else {
            warn!(path = %item.path, kind = %kind, count, error = %message, "Action failed");
        }
        self.observer.item_failed(&item.path, &message, suspended);

        Ok(ExecutionOutcome::Failed { message, suspended })
    }
}
