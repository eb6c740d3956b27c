//! Failure policy
//!
//! - Transient failures are counted per operation type and retried
//! - Counters restart when the local modification time changes
//! - Permission and integrity failures suspend the item at once
//! - A remote change that was not applied keeps the previous cursor
//! - A newer remote version releases a suspended download
//! - Connection loss and cancellation abort the pass without losing state

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use docsync_core::ports::{IStateCache, ISyncObserver, TransferProgress};
use docsync_sync::{ErrorClass, SyncEngine, SyncError};

use crate::common::{path, Harness};

fn set_mtime(h: &Harness, name: &str, at: SystemTime) {
    let file = std::fs::File::options()
        .write(true)
        .open(h.local(name))
        .unwrap();
    file.set_modified(at).unwrap();
}

fn mtime(h: &Harness, name: &str) -> SystemTime {
    std::fs::metadata(h.local(name)).unwrap().modified().unwrap()
}

#[tokio::test]
async fn test_timeout_is_transient() {
    let mut h = Harness::new().await;
    h.settings.request_timeout = Duration::from_millis(200);
    h.repo.put_file("slow.txt", b"eventually");
    h.repo.set_content_delay(Some(Duration::from_secs(1)));

    let result = h.sync().await;

    assert_eq!(result.downloads, 0);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("slow.txt"));
    assert!(h.cache.get_change_cursor().await.unwrap().is_none());
    let failure = h.cache.get_failure(&path("slow.txt")).await.unwrap().unwrap();
    assert_eq!(failure.download.count, 1);

    h.repo.set_content_delay(None);
    let retry = h.sync().await;
    assert_eq!(retry.downloads, 1);
    assert_eq!(h.read_local("slow.txt").as_deref(), Some(&b"eventually"[..]));
    assert!(h.cache.get_failure(&path("slow.txt")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failures_accumulate_at_same_mtime_and_reset_on_edit() {
    let h = Harness::new().await;
    h.write_local("doc.txt", b"draft");
    h.repo.break_writes("doc.txt");

    for _ in 0..3 {
        let result = h.sync().await;
        assert_eq!(result.errors.len(), 1);
    }
    let failure = h.cache.get_failure(&path("doc.txt")).await.unwrap().unwrap();
    assert_eq!(failure.upload.count, 3);
    assert!(failure.upload.message.unwrap().contains("storage error"));

    // A newer local edit starts a fresh count
    set_mtime(&h, "doc.txt", mtime(&h, "doc.txt") + Duration::from_secs(60));
    h.sync().await;
    let failure = h.cache.get_failure(&path("doc.txt")).await.unwrap().unwrap();
    assert_eq!(failure.upload.count, 1);
}

#[tokio::test]
async fn test_quarantine_survives_rewrite_with_same_mtime() {
    let mut h = Harness::new().await;
    h.settings.failure_ceiling = 2;
    h.write_local("doc.txt", b"first");
    h.repo.break_writes("doc.txt");

    h.sync().await;
    h.sync().await;

    let skipped = h.sync().await;
    assert_eq!(skipped.skipped, 1);
    assert!(skipped.errors[0].contains("quarantined"));

    // Rewritten within the filesystem's timestamp granularity
    let original = mtime(&h, "doc.txt");
    h.write_local("doc.txt", b"second");
    set_mtime(&h, "doc.txt", original);
    h.repo.allow_writes("doc.txt");

    let still = h.sync().await;
    assert_eq!(still.skipped, 1);
    assert!(!h.repo.exists("doc.txt"));

    set_mtime(&h, "doc.txt", original + Duration::from_secs(60));
    let released = h.sync().await;
    assert_eq!(released.uploads, 1);
    assert_eq!(h.repo.content("doc.txt").as_deref(), Some(&b"second"[..]));
    assert!(h.cache.get_failure(&path("doc.txt")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_permission_denied_suspends_item() {
    let h = Harness::new().await;
    h.write_local("locked.txt", b"content");
    h.repo.deny_writes("locked.txt");

    let result = h.sync().await;

    assert_eq!(result.errors.len(), 1);
    let failure = h.cache.get_failure(&path("locked.txt")).await.unwrap().unwrap();
    assert_eq!(failure.upload.count, h.settings.failure_ceiling);
    assert!(
        h.cache.get_change_cursor().await.unwrap().is_some(),
        "suspended items do not hold the cursor back"
    );

    let next = h.sync().await;
    assert_eq!(next.skipped, 1);
    assert_eq!(next.uploads, 0);
    assert!(!h.repo.exists("locked.txt"));
}

#[tokio::test]
async fn test_cleared_failure_releases_item() {
    let h = Harness::new().await;
    h.write_local("locked.txt", b"content");
    h.repo.deny_writes("locked.txt");
    h.sync().await;

    h.repo.allow_writes("locked.txt");
    h.cache.clear_failures(&path("locked.txt")).await.unwrap();
    let result = h.sync().await;

    assert_eq!(result.uploads, 1);
    assert!(h.repo.exists("locked.txt"));
}

#[tokio::test]
async fn test_suspended_download_keeps_cursor_until_applied() {
    let h = Harness::new().await;
    h.sync().await;
    let cursor = h.cache.get_change_cursor().await.unwrap();
    assert!(cursor.is_some());

    h.repo.put_file("bad.bin", b"payload");
    h.repo.set_wrong_checksum(true);
    let failed = h.sync().await;
    assert_eq!(failed.downloads, 0);
    assert_eq!(failed.errors.len(), 1);
    assert_eq!(h.cache.get_change_cursor().await.unwrap(), cursor);

    // Still quarantined, still unapplied
    let skipped = h.sync().await;
    assert_eq!(skipped.skipped, 1);
    assert_eq!(h.cache.get_change_cursor().await.unwrap(), cursor);

    h.repo.set_wrong_checksum(false);
    h.cache.clear_failures(&path("bad.bin")).await.unwrap();
    let released = h.sync().await;

    assert!(released.errors.is_empty(), "{:?}", released.errors);
    assert_eq!(released.downloads, 1);
    assert_eq!(h.read_local("bad.bin").as_deref(), Some(&b"payload"[..]));
    assert_ne!(h.cache.get_change_cursor().await.unwrap(), cursor);
}

#[tokio::test]
async fn test_newer_remote_version_releases_suspended_download() {
    let h = Harness::new().await;
    h.repo.put_file("bad.bin", b"first");
    h.repo.set_wrong_checksum(true);
    h.sync().await;
    assert!(h.cache.get_failure(&path("bad.bin")).await.unwrap().is_some());

    h.repo.set_wrong_checksum(false);
    h.repo.put_file("bad.bin", b"second");
    let result = h.sync().await;

    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.downloads, 1);
    assert_eq!(result.skipped, 0);
    assert_eq!(h.read_local("bad.bin").as_deref(), Some(&b"second"[..]));
    assert!(h.cache.get_failure(&path("bad.bin")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_connection_loss_aborts_pass_and_keeps_state() {
    let h = Harness::new().await;
    h.repo.put_file("doc.txt", b"hello");
    h.sync().await;
    let cursor = h.cache.get_change_cursor().await.unwrap();

    let engine = h.engine().await;
    h.repo.put_file("doc.txt", b"changed");
    h.repo.set_connection_down(true);

    let err = engine.sync().await.unwrap_err();

    assert_eq!(err.class(), ErrorClass::Connection);
    assert_eq!(h.cache.get_change_cursor().await.unwrap(), cursor);
    assert!(h.record("doc.txt").await.is_some());
    assert_eq!(h.read_local("doc.txt").as_deref(), Some(&b"hello"[..]));

    h.repo.set_connection_down(false);
    let result = engine.sync().await.unwrap();
    assert_eq!(result.downloads, 1);
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let h = Harness::new().await;
    h.repo.set_connection_down(true);

    let result =
        SyncEngine::connect(&h.repo, h.cache.clone(), h.settings.clone()).await;

    assert!(matches!(result, Err(ref e) if e.class() == ErrorClass::Connection));
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let h = Harness::new().await;
    h.repo.put_file("doc.txt", b"hello");
    let engine = h.engine().await;

    engine.cancellation_token().cancel();
    let result = engine.sync().await;

    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert!(!h.local_exists("doc.txt"));
    assert!(h.cache.get_path_prefix().await.unwrap().is_none());
}

/// Cancels the pass as soon as a transfer makes progress
struct CancelOnProgress {
    token: CancellationToken,
}

impl ISyncObserver for CancelOnProgress {
    fn transfer_progress(&self, _progress: &TransferProgress) {
        self.token.cancel();
    }
}

#[tokio::test]
async fn test_cancel_stops_between_dispatches() {
    let mut h = Harness::new().await;
    h.settings.max_workers = 1;
    for name in ["a.txt", "b.txt", "c.txt"] {
        h.repo.put_file(name, b"data");
    }

    let engine = h.engine().await;
    let token = engine.cancellation_token();
    let engine = engine.with_observer(Arc::new(CancelOnProgress { token }));

    let result = engine.sync().await;

    assert!(matches!(result, Err(SyncError::Cancelled)));
    let downloaded = ["a.txt", "b.txt", "c.txt"]
        .iter()
        .filter(|name| h.local_exists(name))
        .count();
    assert_eq!(downloaded, 1, "the running transfer completes, nothing else starts");
    assert!(h.cache.get_change_cursor().await.unwrap().is_none());
}
