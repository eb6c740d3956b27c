//! Repository session wrapper enforcing call timeouts
//!
//! Every remote call made by the engine goes through [`TimedSession`]. A
//! call that does not complete in time fails with
//! [`RepositoryError::Timeout`], which the failure policy treats as a
//! transient item failure. Content streams are timed per chunk, so a slow
//! but live transfer is never cut off.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;

use docsync_core::domain::newtypes::{ChangeCursor, RemoteId, RemotePath};
use docsync_core::ports::{ChangePage, ContentStream, IRepositorySession, RepoItem, RepositoryError};

/// An [`IRepositorySession`] whose calls are bounded by a timeout
#[derive(Clone)]
pub struct TimedSession {
    inner: Arc<dyn IRepositorySession>,
    timeout: Duration,
}

impl TimedSession {
    pub fn new(inner: Arc<dyn IRepositorySession>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn timed<T, F>(&self, operation: &str, fut: F) -> Result<T, RepositoryError>
    where
        F: Future<Output = Result<T, RepositoryError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RepositoryError::Timeout(format!(
                "{operation} did not complete within {:?}",
                self.timeout
            ))),
        }
    }

    pub async fn get_change_cursor(&self) -> Result<ChangeCursor, RepositoryError> {
        self.timed("get_change_cursor", self.inner.get_change_cursor())
            .await
    }

    pub async fn get_changes(
        &self,
        cursor: &ChangeCursor,
        page_size: u32,
    ) -> Result<ChangePage, RepositoryError> {
        self.timed("get_changes", self.inner.get_changes(cursor, page_size))
            .await
    }

    pub async fn list_children(&self, path: &RemotePath) -> Result<Vec<RepoItem>, RepositoryError> {
        self.timed("list_children", self.inner.list_children(path))
            .await
    }

    pub async fn get_object(&self, id: &RemoteId) -> Result<RepoItem, RepositoryError> {
        self.timed("get_object", self.inner.get_object(id)).await
    }

    pub async fn get_object_by_path(&self, path: &RemotePath) -> Result<RepoItem, RepositoryError> {
        self.timed("get_object_by_path", self.inner.get_object_by_path(path))
            .await
    }

    pub async fn create_folder(
        &self,
        parent: &RemotePath,
        name: &str,
    ) -> Result<RepoItem, RepositoryError> {
        self.timed("create_folder", self.inner.create_folder(parent, name))
            .await
    }

    pub async fn create_document(
        &self,
        parent: &RemotePath,
        name: &str,
        content: Bytes,
    ) -> Result<RepoItem, RepositoryError> {
        self.timed(
            "create_document",
            self.inner.create_document(parent, name, content),
        )
        .await
    }

    pub async fn update_content(
        &self,
        id: &RemoteId,
        content: Bytes,
    ) -> Result<RepoItem, RepositoryError> {
        self.timed("update_content", self.inner.update_content(id, content))
            .await
    }

    pub async fn get_content(
        &self,
        id: &RemoteId,
        offset: u64,
    ) -> Result<ContentStream, RepositoryError> {
        self.timed("get_content", self.inner.get_content(id, offset))
            .await
    }

    /// Pull the next chunk of a content stream
    pub async fn next_chunk(
        &self,
        stream: &mut ContentStream,
    ) -> Result<Option<Bytes>, RepositoryError> {
        self.timed("read_content", async { stream.chunks.next().await.transpose() })
            .await
    }

    pub async fn delete(&self, id: &RemoteId, is_folder: bool) -> Result<(), RepositoryError> {
        self.timed("delete", self.inner.delete(id, is_folder)).await
    }
}
