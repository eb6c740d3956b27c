//! Remote change source
//!
//! Determines what the repository looks like for this pass. The strategy is
//! chosen once per pass from the stored change-feed cursor:
//!
//! - [`ChangeSource::FullCrawl`] lists the whole remote subtree. Paths the
//!   crawl did not see are absent remotely.
//! - [`ChangeSource::Incremental`] replays the change feed since the stored
//!   cursor. Paths no event touched are assumed unchanged.
//!
//! Either way the result is a [`RemoteSnapshot`] plus the cursor to persist
//! once the pass succeeds.
//!
//! ## Design Notes
//!
//! - The latest cursor is fetched *before* crawling, so changes made during
//!   a crawl are replayed by the next incremental pass.
//! - Events are applied in feed order; a later event for the same path wins.
//! - A folder that appears at a path where the cache knows no such folder
//!   (new, moved or copied) is crawled, because the feed may not report its
//!   children individually.
//! - Deletions are resolved through the cache by object id. A deleted folder
//!   expands to all of its cached descendants.
//! - An object the cache knows under another in-root path is reported as a
//!   [`RemoteMove`]. Its old location is still marked absent, so a move the
//!   engine cannot mirror degrades to a delete plus a download.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, info, instrument, warn};

use docsync_core::domain::{
    newtypes::{ChangeCursor, RelativePath, RemoteId, RemotePath},
    triplet::RemoteObservation,
};
use docsync_core::ports::{ChangeKind, IStateCache, RepoItem, RepositoryError};

use crate::ignore::IgnoreRules;
use crate::remote::TimedSession;
use crate::SyncError;

// ============================================================================
// RemoteSnapshot
// ============================================================================

/// What the repository showed for one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEntry {
    Present(RepoItem),
    Absent,
}

/// An object the repository moved from one in-root path to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMove {
    pub id: RemoteId,
    pub from: RelativePath,
    pub to: RelativePath,
}

/// Remote view of the synchronized subtree for one pass
#[derive(Debug, Clone)]
pub struct RemoteSnapshot {
    /// Paths the source has information about
    pub entries: BTreeMap<RelativePath, RemoteEntry>,
    /// Moves seen in the change feed, in feed order
    pub moves: Vec<RemoteMove>,
    /// Whether `entries` lists every remote item; when not, unlisted paths
    /// are assumed unchanged
    pub exhaustive: bool,
    /// Cursor to persist after a successful pass
    pub cursor: ChangeCursor,
}

impl RemoteSnapshot {
    /// The remote observation of `path`
    pub fn observation(&self, path: &RelativePath) -> RemoteObservation {
        match self.entries.get(path) {
            Some(RemoteEntry::Present(item)) => RemoteObservation::Present(item.state()),
            Some(RemoteEntry::Absent) => RemoteObservation::Absent,
            None if self.exhaustive => RemoteObservation::Absent,
            None => RemoteObservation::AssumedUnchanged,
        }
    }

    /// The remote item at `path`, when one was observed
    pub fn item(&self, path: &RelativePath) -> Option<&RepoItem> {
        match self.entries.get(path) {
            Some(RemoteEntry::Present(item)) => Some(item),
            _ => None,
        }
    }

    /// Paths observed present, with their kind
    pub fn present(&self) -> impl Iterator<Item = (&RelativePath, bool)> {
        self.entries.iter().filter_map(|(path, entry)| match entry {
            RemoteEntry::Present(item) => Some((path, item.is_folder)),
            RemoteEntry::Absent => None,
        })
    }

    /// Whether this snapshot saw no remote changes at all
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.moves.is_empty()
    }

    /// Re-key the snapshot after the records under `from` moved to `to`
    ///
    /// Absent marks at the old location no longer apply. `moved` lists the
    /// new paths of the moved descendants; the new location was crawled, so
    /// any of them the crawl did not list is gone.
    pub fn settle_move(&mut self, from: &RelativePath, to: &RelativePath, moved: &[RelativePath]) {
        self.entries.retain(|path, entry| {
            !(*entry == RemoteEntry::Absent && (path == from || path.is_descendant_of(from)))
        });
        for path in moved.iter().filter(|p| p.is_descendant_of(to)) {
            self.entries
                .entry(path.clone())
                .or_insert(RemoteEntry::Absent);
        }
    }
}

// ============================================================================
// ChangeSource
// ============================================================================

/// Remote discovery strategy for one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSource {
    /// First sync, or no usable cursor stored
    FullCrawl,
    /// Replay the change feed from the stored cursor
    Incremental(ChangeCursor),
}

impl ChangeSource {
    /// Pick the strategy from the stored cursor
    ///
    /// An empty cursor means the server keeps no change history, so every
    /// pass crawls.
    pub fn select(stored: Option<ChangeCursor>) -> Self {
        match stored {
            Some(cursor) if !cursor.is_empty() => ChangeSource::Incremental(cursor),
            _ => ChangeSource::FullCrawl,
        }
    }

    /// Collect the remote snapshot for this pass
    ///
    /// # Errors
    /// Any repository or cache failure; the pass cannot proceed without a
    /// remote view
    #[instrument(skip_all, fields(mode = self.mode_name()))]
    pub async fn fetch(
        &self,
        session: &TimedSession,
        cache: &dyn IStateCache,
        root: &RemotePath,
        page_size: u32,
        ignore: &IgnoreRules,
    ) -> Result<RemoteSnapshot, SyncError> {
        match self {
            ChangeSource::FullCrawl => full_crawl(session, root, ignore).await,
            ChangeSource::Incremental(stored) => {
                incremental(session, cache, root, page_size, ignore, stored).await
            }
        }
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            ChangeSource::FullCrawl => "full_crawl",
            ChangeSource::Incremental(_) => "incremental",
        }
    }
}

// ============================================================================
// Full crawl
// ============================================================================

async fn full_crawl(
    session: &TimedSession,
    root: &RemotePath,
    ignore: &IgnoreRules,
) -> Result<RemoteSnapshot, SyncError> {
    let cursor = session.get_change_cursor().await?;

    let mut entries = BTreeMap::new();
    crawl_subtree(session, root, root, ignore, &mut entries).await?;

    info!(items = entries.len(), "Full crawl complete");
    Ok(RemoteSnapshot {
        entries,
        moves: Vec::new(),
        exhaustive: true,
        cursor,
    })
}

/// Breadth-first listing of the remote folder `start`, parents first
async fn crawl_subtree(
    session: &TimedSession,
    root: &RemotePath,
    start: &RemotePath,
    ignore: &IgnoreRules,
    entries: &mut BTreeMap<RelativePath, RemoteEntry>,
) -> Result<(), SyncError> {
    let mut queue = VecDeque::from([start.clone()]);

    while let Some(folder) = queue.pop_front() {
        for child in session.list_children(&folder).await? {
            let Some(path) = child.path.relative_to(root) else {
                warn!(path = %child.path, "Listed child outside the synchronized folder");
                continue;
            };
            if path.is_root() || ignore.is_ignored(&path) {
                continue;
            }
            if child.is_folder {
                queue.push_back(child.path.clone());
            }
            entries.insert(path, RemoteEntry::Present(child));
        }
    }

    Ok(())
}

// ============================================================================
// Incremental
// ============================================================================

async fn incremental(
    session: &TimedSession,
    cache: &dyn IStateCache,
    root: &RemotePath,
    page_size: u32,
    ignore: &IgnoreRules,
    stored: &ChangeCursor,
) -> Result<RemoteSnapshot, SyncError> {
    let latest = session.get_change_cursor().await?;
    if &latest == stored {
        debug!("Change cursor unchanged, no remote changes");
        return Ok(RemoteSnapshot {
            entries: BTreeMap::new(),
            moves: Vec::new(),
            exhaustive: false,
            cursor: latest,
        });
    }

    let mut entries = BTreeMap::new();
    let mut moves = Vec::new();
    let mut cursor = stored.clone();
    let mut events = 0usize;

    loop {
        let page = session.get_changes(&cursor, page_size).await?;
        events += page.events.len();

        for event in &page.events {
            match event.kind {
                ChangeKind::Created | ChangeKind::Updated | ChangeKind::Security => {
                    match session.get_object(&event.object_id).await {
                        Ok(item) => {
                            apply_present(
                                session,
                                cache,
                                root,
                                ignore,
                                item,
                                &mut entries,
                                &mut moves,
                            )
                            .await?
                        }
                        Err(RepositoryError::ObjectNotFound(_)) => {
                            apply_deleted(cache, &event.object_id, &mut entries).await?
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                ChangeKind::Deleted => {
                    apply_deleted(cache, &event.object_id, &mut entries).await?
                }
            }
        }

        if !page.has_more {
            cursor = page.next_cursor;
            break;
        }
        if page.next_cursor == cursor {
            warn!(cursor = %cursor, "Change feed did not advance, stopping");
            break;
        }
        cursor = page.next_cursor;
    }

    info!(events, paths = entries.len(), moves = moves.len(), "Change feed replayed");
    Ok(RemoteSnapshot {
        entries,
        moves,
        exhaustive: false,
        cursor,
    })
}

/// Record an object that exists remotely
async fn apply_present(
    session: &TimedSession,
    cache: &dyn IStateCache,
    root: &RemotePath,
    ignore: &IgnoreRules,
    item: RepoItem,
    entries: &mut BTreeMap<RelativePath, RemoteEntry>,
    moves: &mut Vec<RemoteMove>,
) -> Result<(), SyncError> {
    let cached = cache.find_by_remote_id(&item.id).await?;
    let path = item
        .path
        .relative_to(root)
        .filter(|p| !p.is_root() && !ignore.is_ignored(p));

    // The object used to live somewhere else (or left the synchronized
    // folder): its old location is gone
    if let Some(old) = &cached {
        if path.as_ref() != Some(&old.path) {
            debug!(from = %old.path, to = ?path.as_ref().map(|p| p.as_str()), "Remote object moved");
            mark_absent(cache, &old.path, old.is_folder, entries).await?;
        }
    }

    let Some(path) = path else {
        debug!(path = %item.path, "Ignoring change to an unsynchronized path");
        return Ok(());
    };
    if let Some(old) = cached.as_ref().filter(|old| old.path != path) {
        moves.push(RemoteMove {
            id: item.id.clone(),
            from: old.path.clone(),
            to: path.clone(),
        });
    }

    let known_folder = matches!(&cached, Some(r) if r.is_folder && r.path == path);
    if item.is_folder && !known_folder {
        crawl_subtree(session, root, &item.path, ignore, entries).await?;
    }

    entries.insert(path, RemoteEntry::Present(item));
    Ok(())
}

/// Record a deleted object, expanding folders to their cached descendants
async fn apply_deleted(
    cache: &dyn IStateCache,
    id: &RemoteId,
    entries: &mut BTreeMap<RelativePath, RemoteEntry>,
) -> Result<(), SyncError> {
    match cache.find_by_remote_id(id).await? {
        Some(record) => {
            entries.insert(record.path.clone(), RemoteEntry::Absent);
            if record.is_folder {
                mark_descendants_absent(cache, &record.path, entries).await?;
            }
        }
        None => debug!(id = %id, "Deleted object unknown to the cache"),
    }
    Ok(())
}

/// Mark a moved-away location absent without overriding newer information
async fn mark_absent(
    cache: &dyn IStateCache,
    path: &RelativePath,
    is_folder: bool,
    entries: &mut BTreeMap<RelativePath, RemoteEntry>,
) -> Result<(), SyncError> {
    entries.entry(path.clone()).or_insert(RemoteEntry::Absent);
    if is_folder {
        mark_descendants_absent(cache, path, entries).await?;
    }
    Ok(())
}

async fn mark_descendants_absent(
    cache: &dyn IStateCache,
    path: &RelativePath,
    entries: &mut BTreeMap<RelativePath, RemoteEntry>,
) -> Result<(), SyncError> {
    for descendant in cache.list_descendants(path).await? {
        entries
            .entry(descendant.path)
            .or_insert(RemoteEntry::Absent);
    }
    Ok(())
}
