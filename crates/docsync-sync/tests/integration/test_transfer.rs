//! Resumable downloads
//!
//! - A dead transfer leaves the final file absent or unchanged, plus a
//!   `.partial` file
//! - The next attempt fetches only the missing bytes
//! - Stale partial files and ignored ranges restart from byte 0
//! - A digest mismatch quarantines the item
//! - Progress is reported per chunk

use std::sync::Arc;

use docsync_core::ports::{IStateCache, TransferDirection};

use crate::common::{path, Harness, RecordingObserver};

const CONTENT: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCD";

fn partial(h: &Harness, name: &str) -> std::path::PathBuf {
    h.local(&format!("{name}.partial"))
}

#[tokio::test]
async fn test_interrupted_download_leaves_partial_file() {
    let h = Harness::new().await;
    h.repo.put_file("big.bin", CONTENT);
    h.repo.fail_next_stream_after(10);

    let result = h.sync().await;

    assert_eq!(result.downloads, 0);
    assert_eq!(result.errors.len(), 1);
    assert!(!h.local_exists("big.bin"));
    assert_eq!(std::fs::read(partial(&h, "big.bin")).unwrap(), &CONTENT[..10]);
    assert!(h.record("big.bin").await.is_none());
    assert!(h.cache.get_download(&path("big.bin")).await.unwrap().is_some());
    assert!(
        h.cache.get_change_cursor().await.unwrap().is_none(),
        "cursor not persisted after a failed item"
    );
}

#[tokio::test]
async fn test_resumed_download_fetches_only_missing_bytes() {
    let h = Harness::new().await;
    h.repo.put_file("big.bin", CONTENT);
    h.repo.fail_next_stream_after(10);
    h.sync().await;

    let result = h.sync().await;

    assert_eq!(result.downloads, 1);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(h.repo.requested_offsets(), vec![0, 10]);
    assert_eq!(h.read_local("big.bin").as_deref(), Some(CONTENT));
    assert!(!partial(&h, "big.bin").exists());
    assert!(h.cache.get_download(&path("big.bin")).await.unwrap().is_none());
    assert!(h.cache.get_failure(&path("big.bin")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_interrupted_update_keeps_previous_copy() {
    let h = Harness::new().await;
    h.repo.put_file("doc.txt", b"old version");
    h.sync().await;

    h.repo.put_file("doc.txt", CONTENT);
    h.repo.fail_next_stream_after(8);
    let result = h.sync().await;

    assert_eq!(result.errors.len(), 1);
    assert_eq!(h.read_local("doc.txt").as_deref(), Some(&b"old version"[..]));
    assert_eq!(std::fs::read(partial(&h, "doc.txt")).unwrap(), &CONTENT[..8]);

    let retry = h.sync().await;
    assert_eq!(retry.downloads, 1);
    assert_eq!(h.read_local("doc.txt").as_deref(), Some(CONTENT));
}

#[tokio::test]
async fn test_ignored_range_restarts_from_zero() {
    let h = Harness::new().await;
    h.repo.put_file("big.bin", CONTENT);
    h.repo.fail_next_stream_after(10);
    h.sync().await;

    h.repo.set_ignore_ranges(true);
    let result = h.sync().await;

    assert_eq!(result.downloads, 1);
    assert_eq!(h.repo.requested_offsets(), vec![0, 10]);
    assert_eq!(h.read_local("big.bin").as_deref(), Some(CONTENT));
}

#[tokio::test]
async fn test_stale_partial_is_discarded() {
    let h = Harness::new().await;
    h.repo.put_file("big.bin", b"first revision of the document");
    h.repo.fail_next_stream_after(10);
    h.sync().await;

    // The document changes before the retry; the old bytes are useless
    h.repo.put_file("big.bin", CONTENT);
    let result = h.sync().await;

    assert_eq!(result.downloads, 1);
    assert_eq!(h.repo.requested_offsets(), vec![0, 0]);
    assert_eq!(h.read_local("big.bin").as_deref(), Some(CONTENT));
}

#[tokio::test]
async fn test_unknown_partial_is_discarded() {
    let h = Harness::new().await;
    h.repo.put_file("big.bin", CONTENT);
    h.write_local("big.bin.partial", b"garbage from elsewhere");

    let result = h.sync().await;

    assert_eq!(result.downloads, 1);
    assert_eq!(h.repo.requested_offsets(), vec![0]);
    assert_eq!(h.read_local("big.bin").as_deref(), Some(CONTENT));
}

#[tokio::test]
async fn test_digest_mismatch_quarantines_item() {
    let h = Harness::new().await;
    let observer = Arc::new(RecordingObserver::default());
    h.repo.put_file("bad.bin", CONTENT);
    h.repo.set_wrong_checksum(true);

    let engine = h.engine().await.with_observer(observer.clone());
    let result = engine.sync().await.unwrap();

    assert_eq!(result.downloads, 0);
    assert_eq!(result.errors.len(), 1);
    assert!(!h.local_exists("bad.bin"));
    assert!(!partial(&h, "bad.bin").exists());
    assert_eq!(
        observer.failed.lock().unwrap().as_slice(),
        &[(path("bad.bin"), true)]
    );
    let failure = h.cache.get_failure(&path("bad.bin")).await.unwrap().unwrap();
    assert_eq!(failure.download.count, h.settings.failure_ceiling);

    // Quarantined items are skipped without touching the repository
    let calls = h.repo.content_calls();
    h.force_full_crawl().await;
    let again = h.sync().await;
    assert_eq!(again.skipped, 1);
    assert!(again.errors[0].contains("quarantined"));
    assert_eq!(h.repo.content_calls(), calls);
}

#[tokio::test]
async fn test_progress_is_reported() {
    let h = Harness::new().await;
    let observer = Arc::new(RecordingObserver::default());
    h.repo.put_file("big.bin", CONTENT);

    let engine = h.engine().await.with_observer(observer.clone());
    let result = engine.sync().await.unwrap();
    assert_eq!(result.downloads, 1);

    let progress = observer.progress.lock().unwrap();
    assert!(progress.len() > 1, "one report per chunk");
    assert!(progress
        .iter()
        .all(|p| p.direction == TransferDirection::Download && p.path == path("big.bin")));
    assert!(progress.windows(2).all(|w| w[0].bytes_done < w[1].bytes_done));
    let last = progress.last().unwrap();
    assert_eq!(last.bytes_done, CONTENT.len() as u64);
    assert_eq!(last.percent(), Some(100.0));

    let started = *observer.started.lock().unwrap();
    assert_eq!(started, *observer.stopped.lock().unwrap());
    assert!(started >= 2, "pass and transfer both signal activity");
}

#[tokio::test]
async fn test_upload_reports_progress() {
    let h = Harness::new().await;
    let observer = Arc::new(RecordingObserver::default());
    h.write_local("up.txt", b"upload me");

    let engine = h.engine().await.with_observer(observer.clone());
    engine.sync().await.unwrap();

    let progress = observer.progress.lock().unwrap();
    let upload = progress
        .iter()
        .find(|p| p.direction == TransferDirection::Upload)
        .expect("upload progress");
    assert_eq!(upload.bytes_done, 9);
    assert_eq!(upload.percent(), Some(100.0));
}
