//! Shared test helpers for engine integration tests
//!
//! Provides an in-memory document repository implementing the repository
//! ports, a recording observer and a harness wiring both to a temporary
//! local root and an in-memory State Cache.
//!
//! The repository keeps a change log: every mutation appends events, and the
//! cursor is the log length. Faults (dead streams, ignored ranges, refused
//! writes, slow calls, a dropped connection) are injected through setters.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use tempfile::TempDir;

use docsync_cache::{DatabasePool, SqliteStateCache};
use docsync_core::domain::{
    newtypes::{ChangeCursor, Checksum, RelativePath, RemoteId, RemotePath},
    sync_item::{CacheRecord, ItemMetadata},
};
use docsync_core::ports::{
    ChangeEvent, ChangeKind, ChangePage, ContentStream, IRepositoryClient, IRepositorySession,
    IStateCache, ISyncObserver, RepoItem, RepositoryError, TransferProgress,
};
use docsync_sync::filesystem::hash_bytes;
use docsync_sync::{SyncEngine, SyncResult, SyncSettings};

/// Remote folder mirrored by every harness
pub const REMOTE_ROOT: &str = "/lib";

/// Chunk size of content streams
const CHUNK: usize = 4;

// ============================================================================
// MemoryRepository
// ============================================================================

#[derive(Debug, Clone)]
struct Object {
    path: String,
    is_folder: bool,
    content: Vec<u8>,
    modified_at: DateTime<Utc>,
}

#[derive(Default)]
struct RepoState {
    objects: BTreeMap<String, Object>,
    log: Vec<ChangeEvent>,
    next_id: u64,
    tick: i64,
    // faults and switches
    report_checksums: bool,
    wrong_checksum: bool,
    no_history: bool,
    ignore_ranges: bool,
    fail_stream_after: Option<usize>,
    denied: HashSet<String>,
    broken: HashSet<String>,
    content_delay: Option<Duration>,
    connection_down: bool,
    // recordings
    requested_offsets: Vec<u64>,
    content_calls: usize,
}

impl RepoState {
    fn now(&mut self) -> DateTime<Utc> {
        self.tick += 1;
        Utc.timestamp_opt(1_700_000_000 + self.tick, 0).unwrap()
    }

    fn id_at(&self, path: &str) -> Option<String> {
        self.objects
            .iter()
            .find(|(_, o)| o.path == path)
            .map(|(id, _)| id.clone())
    }

    fn emit(&mut self, id: &str, kind: ChangeKind) {
        self.log.push(ChangeEvent {
            object_id: RemoteId::new(id).unwrap(),
            kind,
        });
    }

    fn insert(&mut self, path: &str, is_folder: bool, content: Vec<u8>) -> String {
        if let Some(id) = self.id_at(path) {
            let now = self.now();
            let obj = self.objects.get_mut(&id).unwrap();
            obj.content = content;
            obj.modified_at = now;
            self.emit(&id, ChangeKind::Updated);
            return id;
        }
        self.next_id += 1;
        let id = format!("obj-{}", self.next_id);
        let modified_at = self.now();
        self.objects.insert(
            id.clone(),
            Object {
                path: path.to_string(),
                is_folder,
                content,
                modified_at,
            },
        );
        self.emit(&id, ChangeKind::Created);
        id
    }

    /// Ids of the object at `path` and everything below it, deepest first
    fn subtree(&self, path: &str) -> Vec<String> {
        let prefix = format!("{path}/");
        let mut ids: Vec<(usize, String)> = self
            .objects
            .iter()
            .filter(|(_, o)| o.path == path || o.path.starts_with(&prefix))
            .map(|(id, o)| (o.path.len(), id.clone()))
            .collect();
        ids.sort_by(|a, b| b.0.cmp(&a.0));
        ids.into_iter().map(|(_, id)| id).collect()
    }

    fn item(&self, id: &str) -> RepoItem {
        let obj = &self.objects[id];
        let checksum = if obj.is_folder || !self.report_checksums {
            None
        } else if self.wrong_checksum {
            Some(Checksum::new("f".repeat(64)).unwrap())
        } else {
            Some(hash_bytes(&obj.content).unwrap())
        };
        RepoItem {
            id: RemoteId::new(id).unwrap(),
            name: obj.path.rsplit('/').next().unwrap().to_string(),
            path: RemotePath::new(obj.path.clone()).unwrap(),
            is_folder: obj.is_folder,
            modified_at: obj.modified_at,
            size: (!obj.is_folder).then_some(obj.content.len() as u64),
            checksum,
            metadata: ItemMetadata::new().with(ItemMetadata::CREATED_BY, "tester"),
        }
    }

    fn check_connection(&self) -> Result<(), RepositoryError> {
        if self.connection_down {
            Err(RepositoryError::ConnectionFailed("server unreachable".into()))
        } else {
            Ok(())
        }
    }

    fn check_writable(&self, path: &str) -> Result<(), RepositoryError> {
        if self.denied.contains(path) {
            Err(RepositoryError::PermissionDenied(path.to_string()))
        } else if self.broken.contains(path) {
            Err(RepositoryError::ServerRuntime(format!("storage error on {path}")))
        } else {
            Ok(())
        }
    }

    fn folder_exists(&self, path: &str) -> bool {
        path == "/"
            || self
                .objects
                .values()
                .any(|o| o.is_folder && o.path == path)
    }
}

fn child_path(parent: &RemotePath, name: &str) -> String {
    if parent.as_str() == "/" {
        format!("/{name}")
    } else {
        format!("{}/{name}", parent.as_str())
    }
}

/// In-memory repository shared between the test and the engine
#[derive(Clone, Default)]
pub struct MemoryRepository {
    state: Arc<Mutex<RepoState>>,
}

impl MemoryRepository {
    /// A repository holding the empty synchronized folder
    pub fn new() -> Self {
        let repo = Self::default();
        repo.put_folder("");
        repo
    }

    fn full(path: &str) -> String {
        if path.is_empty() {
            REMOTE_ROOT.to_string()
        } else {
            format!("{REMOTE_ROOT}/{path}")
        }
    }

    // --- server-side edits (another user) ---

    /// Create or overwrite a document, relative to the synchronized folder
    pub fn put_file(&self, path: &str, content: &[u8]) -> String {
        let mut state = self.state.lock().unwrap();
        state.insert(&Self::full(path), false, content.to_vec())
    }

    pub fn put_folder(&self, path: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.insert(&Self::full(path), true, Vec::new())
    }

    /// Create an object outside the synchronized folder
    pub fn put_outside(&self, absolute: &str, content: &[u8]) -> String {
        let mut state = self.state.lock().unwrap();
        state.insert(absolute, false, content.to_vec())
    }

    /// Drop the newest change-log entry, hiding that edit from the feed
    pub fn hide_last_event(&self) {
        self.state.lock().unwrap().log.pop();
    }

    /// Delete an object and its subtree, logging only the top object
    pub fn remove(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        let full = Self::full(path);
        let top = state.id_at(&full).expect("object to remove");
        for id in state.subtree(&full) {
            state.objects.remove(&id);
        }
        state.emit(&top, ChangeKind::Deleted);
    }

    /// Move an object and its subtree, logging only the top object
    pub fn rename(&self, from: &str, to: &str) {
        let mut state = self.state.lock().unwrap();
        let (from, to) = (Self::full(from), Self::full(to));
        let top = state.id_at(&from).expect("object to move");
        for id in state.subtree(&from) {
            let obj = state.objects.get_mut(&id).unwrap();
            obj.path = format!("{to}{}", &obj.path[from.len()..]);
        }
        let now = state.now();
        state.objects.get_mut(&top).unwrap().modified_at = now;
        state.emit(&top, ChangeKind::Updated);
    }

    // --- inspection ---

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let id = state.id_at(&Self::full(path))?;
        Some(state.objects[&id].content.clone())
    }

    pub fn exists(&self, path: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.id_at(&Self::full(path)).is_some()
    }

    pub fn id_of(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().id_at(&Self::full(path))
    }

    pub fn requested_offsets(&self) -> Vec<u64> {
        self.state.lock().unwrap().requested_offsets.clone()
    }

    pub fn content_calls(&self) -> usize {
        self.state.lock().unwrap().content_calls
    }

    // --- switches ---

    pub fn set_report_checksums(&self, on: bool) {
        self.state.lock().unwrap().report_checksums = on;
    }

    pub fn set_wrong_checksum(&self, on: bool) {
        let mut state = self.state.lock().unwrap();
        state.report_checksums = on;
        state.wrong_checksum = on;
    }

    pub fn set_no_history(&self, on: bool) {
        self.state.lock().unwrap().no_history = on;
    }

    pub fn set_ignore_ranges(&self, on: bool) {
        self.state.lock().unwrap().ignore_ranges = on;
    }

    /// The next content stream dies after `bytes` absolute bytes
    pub fn fail_next_stream_after(&self, bytes: usize) {
        self.state.lock().unwrap().fail_stream_after = Some(bytes);
    }

    pub fn deny_writes(&self, path: &str) {
        self.state.lock().unwrap().denied.insert(Self::full(path));
    }

    /// Writes to `path` fail with a server runtime error
    pub fn break_writes(&self, path: &str) {
        self.state.lock().unwrap().broken.insert(Self::full(path));
    }

    pub fn allow_writes(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        let full = Self::full(path);
        state.denied.remove(&full);
        state.broken.remove(&full);
    }

    pub fn set_content_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().content_delay = delay;
    }

    pub fn set_connection_down(&self, down: bool) {
        self.state.lock().unwrap().connection_down = down;
    }
}

#[async_trait]
impl IRepositoryClient for MemoryRepository {
    async fn connect(&self) -> Result<Arc<dyn IRepositorySession>, RepositoryError> {
        self.state.lock().unwrap().check_connection()?;
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl IRepositorySession for MemoryRepository {
    async fn get_change_cursor(&self) -> Result<ChangeCursor, RepositoryError> {
        let state = self.state.lock().unwrap();
        state.check_connection()?;
        if state.no_history {
            return Ok(ChangeCursor::new(""));
        }
        Ok(ChangeCursor::new(state.log.len().to_string()))
    }

    async fn get_changes(
        &self,
        cursor: &ChangeCursor,
        page_size: u32,
    ) -> Result<ChangePage, RepositoryError> {
        let state = self.state.lock().unwrap();
        state.check_connection()?;
        let start: usize = cursor
            .as_str()
            .parse()
            .map_err(|_| RepositoryError::ServerRuntime(format!("bad cursor {cursor}")))?;
        let start = start.min(state.log.len());
        let end = (start + page_size as usize).min(state.log.len());
        Ok(ChangePage {
            events: state.log[start..end].to_vec(),
            next_cursor: ChangeCursor::new(end.to_string()),
            has_more: end < state.log.len(),
        })
    }

    async fn list_children(&self, path: &RemotePath) -> Result<Vec<RepoItem>, RepositoryError> {
        let state = self.state.lock().unwrap();
        state.check_connection()?;
        if !state.folder_exists(path.as_str()) {
            return Err(RepositoryError::ObjectNotFound(path.to_string()));
        }
        let ids: Vec<String> = state
            .objects
            .iter()
            .filter(|(_, o)| {
                RemotePath::new(o.path.clone())
                    .ok()
                    .and_then(|p| p.parent())
                    .is_some_and(|p| &p == path)
            })
            .map(|(id, _)| id.clone())
            .collect();
        Ok(ids.iter().map(|id| state.item(id)).collect())
    }

    async fn get_object(&self, id: &RemoteId) -> Result<RepoItem, RepositoryError> {
        let state = self.state.lock().unwrap();
        state.check_connection()?;
        if !state.objects.contains_key(id.as_str()) {
            return Err(RepositoryError::ObjectNotFound(id.to_string()));
        }
        Ok(state.item(id.as_str()))
    }

    async fn get_object_by_path(&self, path: &RemotePath) -> Result<RepoItem, RepositoryError> {
        let state = self.state.lock().unwrap();
        state.check_connection()?;
        let id = state
            .id_at(path.as_str())
            .ok_or_else(|| RepositoryError::ObjectNotFound(path.to_string()))?;
        Ok(state.item(&id))
    }

    async fn create_folder(
        &self,
        parent: &RemotePath,
        name: &str,
    ) -> Result<RepoItem, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.check_connection()?;
        let path = child_path(parent, name);
        state.check_writable(&path)?;
        if !state.folder_exists(parent.as_str()) {
            return Err(RepositoryError::ObjectNotFound(parent.to_string()));
        }
        if state.id_at(&path).is_some() {
            return Err(RepositoryError::ServerRuntime(format!("{path} already exists")));
        }
        let id = state.insert(&path, true, Vec::new());
        Ok(state.item(&id))
    }

    async fn create_document(
        &self,
        parent: &RemotePath,
        name: &str,
        content: Bytes,
    ) -> Result<RepoItem, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.check_connection()?;
        let path = child_path(parent, name);
        state.check_writable(&path)?;
        if !state.folder_exists(parent.as_str()) {
            return Err(RepositoryError::ObjectNotFound(parent.to_string()));
        }
        if state.id_at(&path).is_some() {
            return Err(RepositoryError::ServerRuntime(format!("{path} already exists")));
        }
        let id = state.insert(&path, false, content.to_vec());
        Ok(state.item(&id))
    }

    async fn update_content(
        &self,
        id: &RemoteId,
        content: Bytes,
    ) -> Result<RepoItem, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.check_connection()?;
        let path = state
            .objects
            .get(id.as_str())
            .map(|o| o.path.clone())
            .ok_or_else(|| RepositoryError::ObjectNotFound(id.to_string()))?;
        state.check_writable(&path)?;
        let id = state.insert(&path, false, content.to_vec());
        Ok(state.item(&id))
    }

    async fn get_content(
        &self,
        id: &RemoteId,
        offset: u64,
    ) -> Result<ContentStream, RepositoryError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.check_connection()?;
            state.content_calls += 1;
            state.content_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        let obj = state
            .objects
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| RepositoryError::ObjectNotFound(id.to_string()))?;
        state.requested_offsets.push(offset);

        let honoured = if state.ignore_ranges {
            0
        } else {
            (offset as usize).min(obj.content.len())
        };
        let fail_after = state.fail_stream_after.take();

        let mut chunks: Vec<Result<Bytes, RepositoryError>> = Vec::new();
        let mut pos = honoured;
        while pos < obj.content.len() {
            if fail_after.is_some_and(|limit| pos >= limit) {
                chunks.push(Err(RepositoryError::ServerRuntime(
                    "connection reset during transfer".into(),
                )));
                break;
            }
            let end = (pos + CHUNK).min(obj.content.len());
            let end = fail_after.map_or(end, |limit| end.min(limit.max(pos + 1)));
            chunks.push(Ok(Bytes::copy_from_slice(&obj.content[pos..end])));
            pos = end;
        }

        Ok(ContentStream {
            offset: honoured as u64,
            length: Some(obj.content.len() as u64),
            chunks: futures_util::stream::iter(chunks).boxed(),
        })
    }

    async fn delete(&self, id: &RemoteId, is_folder: bool) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.check_connection()?;
        let obj = state
            .objects
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| RepositoryError::ObjectNotFound(id.to_string()))?;
        state.check_writable(&obj.path)?;
        if obj.is_folder != is_folder {
            return Err(RepositoryError::ServerRuntime("kind mismatch".into()));
        }
        for removed in state.subtree(&obj.path) {
            state.objects.remove(&removed);
            state.emit(&removed, ChangeKind::Deleted);
        }
        Ok(())
    }
}

// ============================================================================
// RecordingObserver
// ============================================================================

/// Observer keeping every notification
#[derive(Default)]
pub struct RecordingObserver {
    pub started: Mutex<u32>,
    pub stopped: Mutex<u32>,
    pub progress: Mutex<Vec<TransferProgress>>,
    pub failed: Mutex<Vec<(RelativePath, bool)>>,
}

impl ISyncObserver for RecordingObserver {
    fn activity_started(&self) {
        *self.started.lock().unwrap() += 1;
    }

    fn activity_stopped(&self) {
        *self.stopped.lock().unwrap() += 1;
    }

    fn transfer_progress(&self, progress: &TransferProgress) {
        self.progress.lock().unwrap().push(progress.clone());
    }

    fn item_failed(&self, path: &RelativePath, _message: &str, suspended: bool) {
        self.failed.lock().unwrap().push((path.clone(), suspended));
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Temporary local root, in-memory cache and repository
pub struct Harness {
    pub dir: TempDir,
    pub repo: MemoryRepository,
    pub cache: Arc<SqliteStateCache>,
    pub settings: SyncSettings,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let pool = DatabasePool::in_memory().await.unwrap();
        let cache = Arc::new(SqliteStateCache::new(pool.pool().clone()));
        let mut settings = SyncSettings::new(dir.path().join("root"), REMOTE_ROOT);
        settings.request_timeout = Duration::from_secs(5);
        Self {
            dir,
            repo: MemoryRepository::new(),
            cache,
            settings,
        }
    }

    pub async fn engine(&self) -> SyncEngine {
        SyncEngine::connect(&self.repo, self.cache.clone(), self.settings.clone())
            .await
            .unwrap()
    }

    /// Run one pass that must not fail at pass level
    pub async fn sync(&self) -> SyncResult {
        self.engine().await.sync().await.unwrap()
    }

    pub fn root(&self) -> PathBuf {
        self.settings.root.clone()
    }

    pub fn local(&self, path: &str) -> PathBuf {
        self.root().join(path)
    }

    pub fn write_local(&self, path: &str, content: &[u8]) {
        let full = self.local(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }

    pub fn read_local(&self, path: &str) -> Option<Vec<u8>> {
        std::fs::read(self.local(path)).ok()
    }

    pub fn local_exists(&self, path: &str) -> bool {
        self.local(path).symlink_metadata().is_ok()
    }

    /// Sorted names inside a local folder
    pub fn local_names(&self, path: &str) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.local(path))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    pub async fn record(&self, path: &str) -> Option<CacheRecord> {
        self.cache
            .get_record(&RelativePath::new(path).unwrap())
            .await
            .unwrap()
    }

    /// Forget the change cursor so the next pass crawls
    pub async fn force_full_crawl(&self) {
        self.cache.clear_change_cursor().await.unwrap();
    }
}

pub fn path(s: &str) -> RelativePath {
    RelativePath::new(s).unwrap()
}

/// Whether a pass did nothing at all
pub fn is_quiet(result: &SyncResult) -> bool {
    result.downloads == 0
        && result.uploads == 0
        && result.deletes == 0
        && result.conflicts == 0
        && result.moves == 0
        && result.errors.is_empty()
}
