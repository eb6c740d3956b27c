//! Resumable content download
//!
//! Content is streamed into `<name>.partial` next to its destination and
//! renamed into place only once every byte arrived and the digest matched.
//! A transfer that dies midway leaves the previous local copy untouched and
//! the `.partial` file on disk for the next attempt.
//!
//! ## Resume protocol
//!
//! 1. The cache's download entry records the remote timestamp the partial
//!    file belongs to. A partial file for another timestamp (or with no
//!    entry at all) is stale and deleted.
//! 2. The stream is requested at the partial length. The server answers
//!    with the offset it actually honoured; the partial file is truncated to
//!    that offset, so a server that ignores ranges restarts from byte 0.
//! 3. The kept prefix is re-hashed so the final digest covers the whole
//!    file.

use std::io::{ErrorKind, SeekFrom};
use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use docsync_core::domain::newtypes::{Checksum, RelativePath};
use docsync_core::ports::{
    ISyncObserver, IStateCache, RepoItem, TransferDirection, TransferProgress,
};

use crate::filesystem::{checksum_from_hasher, hash_file_prefix, LocalFileSystem};
use crate::remote::TimedSession;
use crate::SyncError;

/// Streams remote documents onto the local filesystem
pub struct Downloader {
    session: TimedSession,
    cache: Arc<dyn IStateCache>,
    fs: Arc<LocalFileSystem>,
    observer: Arc<dyn ISyncObserver>,
}

impl Downloader {
    pub fn new(
        session: TimedSession,
        cache: Arc<dyn IStateCache>,
        fs: Arc<LocalFileSystem>,
        observer: Arc<dyn ISyncObserver>,
    ) -> Self {
        Self {
            session,
            cache,
            fs,
            observer,
        }
    }

    /// Download `item` to `path` and return the digest of the written file
    ///
    /// The cache record is not touched; the caller finalizes the download
    /// with [`IStateCache::complete_download`].
    ///
    /// # Errors
    /// - `SyncError::Repository` when the content cannot be fetched
    /// - `SyncError::IoError` on local write failures or a short stream (the
    ///   partial file is kept for resume)
    /// - `SyncError::Integrity` when the digest does not match the one the
    ///   repository announced (the partial file is discarded)
    #[instrument(skip(self, item), fields(path = %path, id = %item.id))]
    pub async fn download(
        &self,
        path: &RelativePath,
        item: &RepoItem,
    ) -> Result<Checksum, SyncError> {
        self.observer.activity_started();
        let result = self.stream_to_partial(path, item).await;
        self.observer.activity_stopped();
        let checksum = result?;

        if let Some(expected) = &item.checksum {
            if expected != &checksum {
                self.fs.remove_partial(path).await?;
                self.cache.clear_download(path).await?;
                return Err(SyncError::Integrity(format!(
                    "{path}: downloaded digest {checksum} does not match announced {expected}"
                )));
            }
        }

        tokio::fs::rename(self.fs.partial_path(path), self.fs.absolute(path)).await?;
        debug!(%checksum, "Download moved into place");
        Ok(checksum)
    }

    /// Offset to resume from, discarding stale partial files
    async fn resume_offset(&self, path: &RelativePath, item: &RepoItem) -> Result<u64, SyncError> {
        let existing = match tokio::fs::metadata(self.fs.partial_path(path)).await {
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let started_for = self.cache.get_download(path).await?;

        match existing {
            Some(len) if started_for == Some(item.modified_at) => Ok(len),
            Some(len) => {
                info!(bytes = len, "Discarding stale partial download");
                self.fs.remove_partial(path).await?;
                Ok(0)
            }
            None => Ok(0),
        }
    }

    async fn stream_to_partial(
        &self,
        path: &RelativePath,
        item: &RepoItem,
    ) -> Result<Checksum, SyncError> {
        if let Some(parent) = path.parent() {
            if !parent.is_root() {
                self.fs.create_dir(&parent).await?;
            }
        }

        let requested = self.resume_offset(path, item).await?;
        self.cache.begin_download(path, item.modified_at).await?;

        let mut stream = self.session.get_content(&item.id, requested).await?;
        let kept = stream.offset;
        if kept > requested {
            return Err(SyncError::Integrity(format!(
                "{path}: server resumed at byte {kept}, only {requested} bytes are local"
            )));
        }
        if kept < requested {
            debug!(requested, kept, "Server did not honour the full resume offset");
        }

        let partial = self.fs.partial_path(path);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&partial)
            .await?;
        file.set_len(kept).await?;

        let mut hasher = Sha256::new();
        if kept > 0 {
            let hashed = hash_file_prefix(&partial, &mut hasher, kept).await?;
            if hashed != kept {
                return Err(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("partial file shorter than {kept} bytes"),
                )
                .into());
            }
            info!(offset = kept, "Resuming download");
        }
        file.seek(SeekFrom::Start(kept)).await?;

        let total = stream.length.or(item.size);
        let started = Instant::now();
        let mut done = kept;

        loop {
            let chunk = match self.session.next_chunk(&mut stream).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    // Keep what arrived for the next attempt
                    file.flush().await?;
                    info!(bytes = done, "Transfer interrupted, partial file kept");
                    return Err(e.into());
                }
            };
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            done += chunk.len() as u64;

            let elapsed = started.elapsed().as_secs_f64();
            self.observer.transfer_progress(&TransferProgress {
                path: path.clone(),
                direction: TransferDirection::Download,
                bytes_done: done,
                total_bytes: total,
                rate_bytes_per_sec: if elapsed > 0.0 {
                    (done - kept) as f64 / elapsed
                } else {
                    0.0
                },
            });
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = total {
            if done != expected {
                warn!(done, expected, "Content stream ended early");
                return Err(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("received {done} of {expected} bytes"),
                )
                .into());
            }
        }

        checksum_from_hasher(hasher)
    }
}
