//! Sync orchestrator
//!
//! The [`SyncEngine`] runs one reconciliation pass between the local root
//! and the remote folder.
//!
//! ## Sync Flow
//!
//! 1. **Anchor**: compare the stored path prefix with the configured root
//! 2. **Discover**: collect the remote snapshot (full crawl or change feed),
//!    mirror remote moves locally, walk the local root and list the cached
//!    records
//! 3. **Reconcile**: per path, observe the triplet, reduce it and execute
//!    the action; levels run parents first, paths of one level in parallel
//! 4. **Drain**: run the deferred folder deletions, deepest first
//! 5. **Bookkeeping**: persist the change cursor unless a remote change was
//!    left unapplied, return a summary
//!
//! ## Design Decisions
//!
//! - **Bounded pool**: one level is a `buffer_unordered(max_workers)`
//!   stream, so at most `max_workers` items are evaluated and executed at
//!   once, each on a single worker from observation to cache write.
//! - **Cancellation**: the token is checked before each dispatch; items
//!   already dispatched run to completion.
//! - **Per-path exclusion**: a path already being processed (by a pass
//!   running concurrently on the same engine) is skipped.
//! - **Cursor hold-back**: the cursor only advances past changes that were
//!   applied. A failed or quarantined item whose remote side differs from
//!   the baseline keeps the previous cursor, so the change is replayed until
//!   it lands. Suspended local-only changes do not hold it back; the walk
//!   finds them again on every pass.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use futures_util::{future, stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use docsync_conflict::ConflictResolver;
use docsync_core::config::Config;
use docsync_core::domain::{
    errors::DomainError,
    newtypes::{PathPrefix, RelativePath, RemotePath},
    sync_item::{CacheRecord, SyncItem},
    triplet::{Action, LocalObservation, SyncTriplet},
};
use docsync_core::ports::{
    IRepositoryClient, IRepositorySession, ISyncObserver, IStateCache, NullObserver, RepoItem,
};

use crate::change_source::{ChangeSource, RemoteSnapshot};
use crate::executor::{ActionExecutor, ExecutionOutcome};
use crate::filesystem::{LocalFileSystem, LocalState};
use crate::ignore::IgnoreRules;
use crate::remote::TimedSession;
use crate::{ErrorClass, SyncError};

/// Upper bound on resolve-and-reduce rounds for one conflicting item
const MAX_CONFLICT_ROUNDS: usize = 2;

// ============================================================================
// SyncSettings
// ============================================================================

/// Engine parameters extracted from the configuration
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Absolute local root
    pub root: PathBuf,
    /// Remote folder mirrored into `root`
    pub remote_folder: String,
    /// Whether local changes are pushed
    pub bidirectional: bool,
    /// Bounded worker pool size
    pub max_workers: usize,
    /// Change-feed page ceiling
    pub change_page_size: u32,
    /// Counter value at which an item is suspended
    pub failure_ceiling: u32,
    /// Timeout applied to every remote call
    pub request_timeout: Duration,
    /// Extra ignore patterns
    pub ignore: Vec<String>,
}

impl SyncSettings {
    /// Settings with default tuning for the given root and remote folder
    pub fn new(root: PathBuf, remote_folder: impl Into<String>) -> Self {
        let defaults = Config::default().sync;
        Self {
            root,
            remote_folder: remote_folder.into(),
            bidirectional: defaults.bidirectional,
            max_workers: defaults.max_workers,
            change_page_size: defaults.change_page_size,
            failure_ceiling: defaults.failure_ceiling,
            request_timeout: Duration::from_secs(defaults.request_timeout_secs),
            ignore: defaults.ignore,
        }
    }
}

impl From<&Config> for SyncSettings {
    fn from(config: &Config) -> Self {
        Self {
            root: config.sync_root(),
            remote_folder: config.sync.remote_folder.clone(),
            bidirectional: config.sync.bidirectional,
            max_workers: config.sync.max_workers,
            change_page_size: config.sync.change_page_size,
            failure_ceiling: config.sync.failure_ceiling,
            request_timeout: Duration::from_secs(config.sync.request_timeout_secs),
            ignore: config.sync.ignore.clone(),
        }
    }
}

// ============================================================================
// SyncResult
// ============================================================================

/// Summary of a completed sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    /// Documents and folders brought down from the repository
    pub downloads: u32,
    /// Documents and folders pushed to the repository
    pub uploads: u32,
    /// Local and remote deletions
    pub deletes: u32,
    /// Conflicts resolved by moving the local copy aside
    pub conflicts: u32,
    /// Remote moves mirrored by renaming the local entry
    pub moves: u32,
    /// Items deliberately left alone this pass (quarantined, kept folders)
    pub skipped: u32,
    /// Errors encountered during the pass (non-fatal)
    pub errors: Vec<String>,
    /// Wall-clock duration of the pass in milliseconds
    pub duration_ms: u64,
}

/// What happened to one item
#[derive(Debug)]
enum ItemOutcome {
    Unchanged,
    Applied(Action),
    Skipped,
    Quarantined { message: String, holds_cursor: bool },
    Failed { message: String, holds_cursor: bool },
    Deferred(DeferredDelete),
}

#[derive(Debug)]
struct ItemReport {
    path: RelativePath,
    conflicts: u32,
    outcome: ItemOutcome,
}

/// A folder deletion postponed until every child has been processed
#[derive(Debug)]
struct DeferredDelete {
    triplet: SyncTriplet,
    action: Action,
    record: Option<CacheRecord>,
}

/// Running totals of a pass
#[derive(Debug, Default)]
struct Tally {
    result: SyncResult,
    /// Items whose change must be replayed from the same cursor
    unapplied: u32,
}

impl Tally {
    fn add(&mut self, report: ItemReport) -> Option<DeferredDelete> {
        self.result.conflicts += report.conflicts;
        match report.outcome {
            ItemOutcome::Unchanged => {}
            ItemOutcome::Applied(action) => self.applied(action),
            ItemOutcome::Skipped => self.result.skipped += 1,
            ItemOutcome::Quarantined {
                message,
                holds_cursor,
            } => {
                self.result.skipped += 1;
                self.unapplied += u32::from(holds_cursor);
                self.result
                    .errors
                    .push(format!("{}: quarantined: {message}", report.path));
            }
            ItemOutcome::Failed {
                message,
                holds_cursor,
            } => {
                self.unapplied += u32::from(holds_cursor);
                self.result.errors.push(format!("{}: {message}", report.path));
            }
            ItemOutcome::Deferred(deferred) => return Some(deferred),
        }
        None
    }

    fn applied(&mut self, action: Action) {
        match action {
            Action::Download => self.result.downloads += 1,
            Action::Upload => self.result.uploads += 1,
            Action::DeleteLocal | Action::DeleteRemote => self.result.deletes += 1,
            Action::NoOp | Action::Conflict | Action::RemoveDbRecord => {}
        }
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Three-way reconciliation engine
///
/// ## Dependencies
///
/// - `session`: Open repository session, every call bounded by the timeout
/// - `cache`: State Cache holding the last-synchronized baseline
/// - `observer`: Receives activity and transfer progress
pub struct SyncEngine {
    session: TimedSession,
    cache: Arc<dyn IStateCache>,
    observer: Arc<dyn ISyncObserver>,
    settings: SyncSettings,
    prefix: PathPrefix,
    remote_root: RemotePath,
    fs: Arc<LocalFileSystem>,
    resolver: ConflictResolver,
    in_flight: DashSet<RelativePath>,
    cancel: CancellationToken,
}

impl SyncEngine {
    /// Creates an engine over an open session
    ///
    /// # Errors
    /// `SyncError::DomainError` when the root is not absolute, the remote
    /// folder is not an absolute repository path or an ignore pattern is
    /// invalid
    pub fn new(
        session: Arc<dyn IRepositorySession>,
        cache: Arc<dyn IStateCache>,
        settings: SyncSettings,
    ) -> Result<Self, SyncError> {
        let prefix = PathPrefix::new(settings.root.clone())?;
        let remote_root = RemotePath::new(settings.remote_folder.clone())?;
        let ignore = IgnoreRules::new(&settings.ignore).map_err(|e| {
            DomainError::ValidationFailed(format!("Invalid ignore pattern: {e}"))
        })?;

        Ok(Self {
            session: TimedSession::new(session, settings.request_timeout),
            fs: Arc::new(LocalFileSystem::new(prefix.clone(), ignore)),
            resolver: ConflictResolver::new(cache.clone(), prefix.clone()),
            cache,
            observer: Arc::new(NullObserver),
            settings,
            prefix,
            remote_root,
            in_flight: DashSet::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Opens a session with `client` and creates an engine over it
    ///
    /// # Errors
    /// `SyncError::Repository` when the session cannot be opened
    pub async fn connect(
        client: &dyn IRepositoryClient,
        cache: Arc<dyn IStateCache>,
        settings: SyncSettings,
    ) -> Result<Self, SyncError> {
        let session = client.connect().await?;
        Self::new(session, cache, settings)
    }

    /// Reports activity and progress to `observer`
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ISyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Token cancelling the running pass between dispatches
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    // ========================================================================
    // Pass
    // ========================================================================

    /// Runs one sync pass
    ///
    /// # Returns
    /// A [`SyncResult`] summarizing the pass
    ///
    /// # Errors
    /// Pass-level failures: the remote snapshot cannot be collected, the
    /// local root cannot be walked, the connection was lost or the pass was
    /// cancelled. Item failures are reported in the result instead.
    #[tracing::instrument(skip(self), fields(root = %self.prefix, remote = %self.remote_root))]
    pub async fn sync(&self) -> Result<SyncResult, SyncError> {
        let start = Instant::now();

        self.observer.activity_started();
        let outcome = self.run_pass().await;
        self.observer.activity_stopped();

        let mut result = outcome?;
        result.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            downloaded = result.downloads,
            uploaded = result.uploads,
            deleted = result.deletes,
            conflicts = result.conflicts,
            moved = result.moves,
            skipped = result.skipped,
            errors = result.errors.len(),
            duration_ms = result.duration_ms,
            "Sync cycle completed"
        );

        Ok(result)
    }

    async fn run_pass(&self) -> Result<SyncResult, SyncError> {
        self.ensure_not_cancelled()?;
        self.anchor_prefix().await?;

        // Step 1: Remote snapshot
        let source = ChangeSource::select(self.cache.get_change_cursor().await?);
        info!(mode = source.mode_name(), "Starting sync cycle");
        let mut snapshot = source
            .fetch(
                &self.session,
                self.cache.as_ref(),
                &self.remote_root,
                self.settings.change_page_size,
                self.fs.ignore_rules(),
            )
            .await?;

        // Step 2: Mirror moves, then collect the items to evaluate by depth
        let moves = self.apply_remote_moves(&mut snapshot).await?;
        let levels = self.collect_items(&snapshot).await?;

        // Step 3: Reconcile level by level, parents first
        let executor = ActionExecutor::new(
            self.session.clone(),
            self.cache.clone(),
            self.fs.clone(),
            self.observer.clone(),
            self.remote_root.clone(),
            self.settings.failure_ceiling,
        );
        let mut tally = Tally::default();
        tally.result.moves = moves;
        let mut deferred = Vec::new();

        for (depth, items) in levels {
            debug!(depth, items = items.len(), "Processing level");
            let reports: Vec<Result<ItemReport, SyncError>> = stream::iter(items)
                .take_while(|_| future::ready(!self.cancel.is_cancelled()))
                .map(|item| self.process_item(item, &snapshot, &executor))
                .buffer_unordered(self.settings.max_workers.max(1))
                .collect()
                .await;

            for report in reports {
                if let Some(delete) = tally.add(report?) {
                    deferred.push(delete);
                }
            }
            self.ensure_not_cancelled()?;
        }

        // Step 4: Deferred folder deletions, deepest first
        deferred.sort_by(|a, b| {
            b.triplet
                .item
                .path
                .depth()
                .cmp(&a.triplet.item.path.depth())
                .then_with(|| a.triplet.item.path.cmp(&b.triplet.item.path))
        });
        for delete in deferred {
            self.ensure_not_cancelled()?;
            let report = self.drain_deferred(delete, &executor).await?;
            tally.add(report);
        }

        // Step 5: Persist the cursor last
        if tally.unapplied == 0 {
            self.cache.set_change_cursor(&snapshot.cursor).await?;
        } else {
            info!(
                unapplied = tally.unapplied,
                "Keeping the previous change cursor so unapplied changes are replayed"
            );
        }

        Ok(tally.result)
    }

    fn ensure_not_cancelled(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            warn!("Sync pass cancelled");
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Store the local root, or update it after a relocation
    async fn anchor_prefix(&self) -> Result<(), SyncError> {
        tokio::fs::create_dir_all(self.prefix.as_path()).await?;

        match self.cache.get_path_prefix().await? {
            Some(stored) if stored == self.prefix => {}
            Some(stored) => {
                info!(from = %stored, to = %self.prefix, "Synchronized root relocated");
                self.cache.set_path_prefix(&self.prefix).await?;
            }
            None => self.cache.set_path_prefix(&self.prefix).await?,
        }
        Ok(())
    }

    /// Mirror remote moves by renaming the local entry and its records
    ///
    /// A local edit below a moved folder then reconciles against the new
    /// location instead of conflicting at the old one. A move whose source
    /// is gone locally, or whose target is already taken, is left to the
    /// snapshot's delete-and-download view.
    async fn apply_remote_moves(&self, snapshot: &mut RemoteSnapshot) -> Result<u32, SyncError> {
        let mut applied = 0;

        for mv in std::mem::take(&mut snapshot.moves) {
            // An earlier move may already have carried this record along
            let Some(record) = self.cache.find_by_remote_id(&mv.id).await? else {
                continue;
            };
            let (from, to) = (record.path, mv.to);
            if from == to || to.is_descendant_of(&from) {
                continue;
            }

            let source = self.fs.entry_kind(&from).await?;
            let target_taken = self.fs.entry_kind(&to).await?.is_some()
                || self.cache.get_record(&to).await?.is_some();
            if source != Some(record.is_folder) || target_taken {
                debug!(from = %from, to = %to, "Remote move not mirrored locally");
                continue;
            }

            if let Err(err) = self.fs.rename(&from, &to).await {
                warn!(from = %from, to = %to, error = %err, "Local rename failed");
                continue;
            }
            self.cache.move_record(&from, &to).await?;

            let moved: Vec<RelativePath> = self
                .cache
                .list_descendants(&to)
                .await?
                .into_iter()
                .map(|r| r.path)
                .collect();
            snapshot.settle_move(&from, &to, &moved);

            info!(from = %from, to = %to, "Mirrored remote move");
            applied += 1;
        }

        Ok(applied)
    }

    /// Union of cached, remote and local paths, grouped by depth
    ///
    /// The local kind wins over the remote kind, which wins over the cached
    /// kind.
    async fn collect_items(
        &self,
        snapshot: &RemoteSnapshot,
    ) -> Result<BTreeMap<usize, Vec<SyncItem>>, SyncError> {
        let mut kinds: BTreeMap<RelativePath, bool> = BTreeMap::new();

        for record in self.cache.list_records().await? {
            kinds.insert(record.path, record.is_folder);
        }
        for (path, is_folder) in snapshot.present() {
            kinds.insert(path.clone(), is_folder);
        }
        for entry in self.fs.walk().await? {
            kinds.insert(entry.path, entry.is_folder);
        }

        let ignore = self.fs.ignore_rules();
        let mut levels: BTreeMap<usize, Vec<SyncItem>> = BTreeMap::new();
        for (path, is_folder) in kinds {
            if path.is_root() || ignore.is_ignored(&path) {
                continue;
            }
            levels
                .entry(path.depth())
                .or_default()
                .push(SyncItem { path, is_folder });
        }

        Ok(levels)
    }

    // ========================================================================
    // Items
    // ========================================================================

    /// Evaluate and execute one item on the current worker
    async fn process_item(
        &self,
        item: SyncItem,
        snapshot: &RemoteSnapshot,
        executor: &ActionExecutor,
    ) -> Result<ItemReport, SyncError> {
        let path = item.path.clone();

        if !self.in_flight.insert(path.clone()) {
            debug!(path = %path, "Path already in flight, skipping");
            return Ok(ItemReport {
                path,
                conflicts: 0,
                outcome: ItemOutcome::Skipped,
            });
        }
        let result = self.evaluate(item, snapshot, executor).await;
        self.in_flight.remove(&path);

        match result {
            Ok(report) => Ok(report),
            Err(err) if err.class() == ErrorClass::Connection => Err(err),
            Err(err) => {
                warn!(path = %path, error = %err, "Item could not be evaluated");
                Ok(ItemReport {
                    path,
                    conflicts: 0,
                    outcome: ItemOutcome::Failed {
                        message: err.to_string(),
                        holds_cursor: true,
                    },
                })
            }
        }
    }

    async fn evaluate(
        &self,
        item: SyncItem,
        snapshot: &RemoteSnapshot,
        executor: &ActionExecutor,
    ) -> Result<ItemReport, SyncError> {
        let path = item.path.clone();
        let record = self.cache.get_record(&path).await?;
        let local = self.fs.observe(&path).await?;
        let remote = snapshot.item(&path);
        let mut triplet = SyncTriplet::observe(
            item,
            record.as_ref(),
            &local.observation,
            &snapshot.observation(&path),
        );

        if let Some(failure) = self.cache.get_failure(&path).await? {
            if failure.is_quarantined(local.modified_at, self.settings.failure_ceiling) {
                if failure.superseded_by(remote.map(|r| r.modified_at)) {
                    info!(path = %path, "Newer remote version, releasing suspended item");
                    self.cache.clear_failures(&path).await?;
                } else {
                    debug!(path = %path, "Item quarantined, skipping");
                    return Ok(ItemReport {
                        path,
                        conflicts: 0,
                        outcome: ItemOutcome::Quarantined {
                            message: failure
                                .last_message()
                                .unwrap_or("failed too often")
                                .to_string(),
                            holds_cursor: !triplet.remote_equals_cache,
                        },
                    });
                }
            }
        }

        if record.is_none() {
            if let Some(remote) = remote {
                if self.adopt_baseline(&path, &local, remote).await? {
                    triplet = triplet.after_baseline();
                }
            }
        }

        // Conflict loop: move the local copy aside, then re-reduce
        let mut action = triplet.reduce(self.settings.bidirectional);
        let mut conflicts = 0;
        for _ in 0..MAX_CONFLICT_ROUNDS {
            if action != Action::Conflict {
                break;
            }
            if let Err(err) = self.resolver.resolve(&triplet.item).await {
                let outcome = executor
                    .report_failure(
                        &triplet.item,
                        Action::Conflict,
                        record.as_ref(),
                        remote.map(|r| r.modified_at),
                        err.into(),
                    )
                    .await?;
                return Ok(self.report(path, conflicts, outcome, true));
            }
            conflicts += 1;
            triplet = triplet.after_local_rename();
            action = triplet.reduce(self.settings.bidirectional);
        }
        if action == Action::Conflict {
            warn!(path = %path, "Conflict persisted after resolution");
            return Ok(ItemReport {
                path,
                conflicts,
                outcome: ItemOutcome::Failed {
                    message: "conflict could not be resolved".to_string(),
                    holds_cursor: true,
                },
            });
        }
        // The resolver dropped the record
        let record = if conflicts > 0 { None } else { record };

        if action == Action::NoOp {
            return Ok(ItemReport {
                path,
                conflicts,
                outcome: ItemOutcome::Unchanged,
            });
        }

        if action.is_deletion() && triplet.item.is_folder {
            debug!(path = %path, action = %action, "Folder deletion deferred");
            triplet.is_delayed = true;
            return Ok(ItemReport {
                path,
                conflicts,
                outcome: ItemOutcome::Deferred(DeferredDelete {
                    triplet,
                    action,
                    record,
                }),
            });
        }

        let outcome = executor
            .execute(&triplet.item, action, record.as_ref(), remote)
            .await?;
        Ok(self.report(path, conflicts, outcome, !triplet.remote_equals_cache))
    }

    /// Record an existing match on both sides as the baseline
    ///
    /// Applies to a folder present on both sides, and to a file whose local
    /// digest equals the digest the repository reports.
    async fn adopt_baseline(
        &self,
        path: &RelativePath,
        local: &LocalState,
        remote: &RepoItem,
    ) -> Result<bool, SyncError> {
        let checksum = match (&local.observation, remote.is_folder) {
            (LocalObservation::Folder, true) => None,
            (LocalObservation::File { checksum: Some(local) }, false)
                if remote.checksum.as_ref() == Some(local) =>
            {
                Some(local.clone())
            }
            _ => return Ok(false),
        };

        self.cache
            .save_record(&remote.to_record(path.clone(), checksum))
            .await?;
        debug!(path = %path, "Adopted matching item as baseline");
        Ok(true)
    }

    async fn drain_deferred(
        &self,
        delete: DeferredDelete,
        executor: &ActionExecutor,
    ) -> Result<ItemReport, SyncError> {
        let path = delete.triplet.item.path.clone();
        let remote_pending = !delete.triplet.remote_equals_cache;
        let outcome = executor
            .execute(
                &delete.triplet.item,
                delete.action,
                delete.record.as_ref(),
                None,
            )
            .await?;
        Ok(self.report(path, 0, outcome, remote_pending))
    }

    /// `remote_pending` tells whether the item carried a remote change
    fn report(
        &self,
        path: RelativePath,
        conflicts: u32,
        outcome: ExecutionOutcome,
        remote_pending: bool,
    ) -> ItemReport {
        let outcome = match outcome {
            ExecutionOutcome::Applied(action) => ItemOutcome::Applied(action),
            ExecutionOutcome::Skipped(reason) => {
                debug!(path = %path, %reason, "Item skipped");
                ItemOutcome::Skipped
            }
            ExecutionOutcome::Failed { message, suspended } => ItemOutcome::Failed {
                message,
                holds_cursor: remote_pending || !suspended,
            },
        };
        ItemReport {
            path,
            conflicts,
            outcome,
        }
    }
}
