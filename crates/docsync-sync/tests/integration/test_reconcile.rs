//! End-to-end reconciliation passes
//!
//! - First sync downloads the remote tree
//! - An unchanged tree yields NoOp on every following pass
//! - Local creations and edits are uploaded, then settle
//! - One-way mode never pushes local changes
//! - Matching items on both sides are adopted as the baseline
//! - Ignored artifacts never leave the machine

use docsync_core::ports::IStateCache;
use docsync_sync::filesystem::hash_bytes;

use crate::common::{self, is_quiet, path, Harness};

#[tokio::test]
async fn test_first_sync_downloads_remote_tree() {
    let h = Harness::new().await;
    h.repo.put_folder("A");
    h.repo.put_file("A/b.txt", b"hello");
    h.repo.put_file("top.txt", b"top");

    let result = h.sync().await;

    assert_eq!(result.downloads, 3);
    assert!(result.errors.is_empty());
    assert_eq!(h.read_local("A/b.txt").as_deref(), Some(&b"hello"[..]));
    assert_eq!(h.read_local("top.txt").as_deref(), Some(&b"top"[..]));

    let folder = h.record("A").await.expect("folder record");
    assert!(folder.is_folder);
    let file = h.record("A/b.txt").await.expect("file record");
    assert_eq!(file.checksum, Some(hash_bytes(b"hello").unwrap()));
    assert_eq!(file.metadata.created_by(), Some("tester"));
    assert!(h.cache.get_download(&path("A/b.txt")).await.unwrap().is_none());

    let cursor = h.cache.get_change_cursor().await.unwrap();
    assert!(cursor.is_some(), "cursor persisted after a clean pass");
}

#[tokio::test]
async fn test_unchanged_tree_is_noop() {
    let h = Harness::new().await;
    h.repo.put_folder("A");
    h.repo.put_file("A/b.txt", b"hello");
    h.sync().await;

    // Incremental pass with no remote changes
    let second = h.sync().await;
    assert!(is_quiet(&second), "unexpected work: {second:?}");

    // Full crawl over the same state
    h.force_full_crawl().await;
    let third = h.sync().await;
    assert!(is_quiet(&third), "unexpected work: {third:?}");
}

#[tokio::test]
async fn test_local_creation_uploads_then_settles() {
    let h = Harness::new().await;
    h.sync().await;

    h.write_local("new.txt", b"fresh");
    h.write_local("Docs/inner.txt", b"inner");

    let result = h.sync().await;
    assert_eq!(result.uploads, 3);
    assert_eq!(h.repo.content("new.txt").as_deref(), Some(&b"fresh"[..]));
    assert_eq!(h.repo.content("Docs/inner.txt").as_deref(), Some(&b"inner"[..]));
    assert!(h.record("Docs").await.unwrap().is_folder);

    // The uploads show up in the change feed; replaying them changes nothing
    let replay = h.sync().await;
    assert!(is_quiet(&replay), "unexpected work: {replay:?}");

    // Upload followed by a crawl yields NoOp
    h.force_full_crawl().await;
    let crawl = h.sync().await;
    assert!(is_quiet(&crawl), "unexpected work: {crawl:?}");
}

#[tokio::test]
async fn test_edited_file_is_uploaded_and_checksum_updated() {
    let h = Harness::new().await;
    h.repo.put_file("doc.txt", b"v1");
    h.sync().await;
    let before = h.record("doc.txt").await.unwrap();

    h.write_local("doc.txt", b"version two");
    let result = h.sync().await;

    assert_eq!(result.uploads, 1);
    assert_eq!(h.repo.content("doc.txt").as_deref(), Some(&b"version two"[..]));

    let after = h.record("doc.txt").await.unwrap();
    assert_eq!(after.remote_id, before.remote_id, "content replaced in place");
    assert_eq!(after.checksum, Some(hash_bytes(b"version two").unwrap()));
    assert!(after.remote_modified_at > before.remote_modified_at);
}

#[tokio::test]
async fn test_remote_edit_is_downloaded() {
    let h = Harness::new().await;
    h.repo.put_file("doc.txt", b"v1");
    h.sync().await;

    h.repo.put_file("doc.txt", b"remote v2");
    let result = h.sync().await;

    assert_eq!(result.downloads, 1);
    assert_eq!(result.conflicts, 0);
    assert_eq!(h.read_local("doc.txt").as_deref(), Some(&b"remote v2"[..]));
    assert_eq!(
        h.record("doc.txt").await.unwrap().checksum,
        Some(hash_bytes(b"remote v2").unwrap())
    );
}

#[tokio::test]
async fn test_one_way_mode_ignores_local_changes() {
    let mut h = Harness::new().await;
    h.settings.bidirectional = false;
    h.repo.put_file("doc.txt", b"v1");
    h.sync().await;

    h.write_local("local-only.txt", b"mine");
    h.write_local("doc.txt", b"edited locally");
    h.repo.put_file("remote-new.txt", b"theirs");

    let result = h.sync().await;

    assert_eq!(result.uploads, 0);
    assert_eq!(result.downloads, 1);
    assert!(!h.repo.exists("local-only.txt"));
    assert_eq!(h.repo.content("doc.txt").as_deref(), Some(&b"v1"[..]));
    assert_eq!(h.read_local("remote-new.txt").as_deref(), Some(&b"theirs"[..]));
}

#[tokio::test]
async fn test_matching_items_are_adopted_as_baseline() {
    let h = Harness::new().await;
    h.repo.set_report_checksums(true);
    h.repo.put_folder("Shared");
    h.repo.put_file("Shared/same.txt", b"identical");
    h.write_local("Shared/same.txt", b"identical");

    let result = h.sync().await;

    assert_eq!(result.conflicts, 0);
    assert_eq!(result.downloads, 0);
    assert_eq!(result.uploads, 0);
    assert_eq!(h.local_names("Shared"), vec!["same.txt"]);

    let record = h.record("Shared/same.txt").await.unwrap();
    assert_eq!(record.checksum, Some(hash_bytes(b"identical").unwrap()));
    assert_eq!(record.remote_id.as_str(), h.repo.id_of("Shared/same.txt").unwrap());
    assert!(h.record("Shared").await.unwrap().is_folder);
}

#[tokio::test]
async fn test_ignored_artifacts_are_not_uploaded() {
    let h = Harness::new().await;
    h.write_local("report.docx", b"doc");
    h.write_local("~$report.docx", b"lock");
    h.write_local(".git/config", b"[core]");
    h.write_local("notes.txt.swp", b"swap");
    h.write_local("draft.partial", b"half");

    let result = h.sync().await;

    assert_eq!(result.uploads, 1);
    assert!(h.repo.exists("report.docx"));
    for ignored in ["~$report.docx", ".git", "notes.txt.swp", "draft.partial"] {
        assert!(!h.repo.exists(ignored), "{ignored} must stay local");
    }
}

#[tokio::test]
async fn test_extra_ignore_patterns() {
    let mut h = Harness::new().await;
    h.settings.ignore = vec!["*.iso".to_string()];
    h.write_local("disk.iso", b"image");
    h.repo.put_file("remote.iso", b"image");

    let result = h.sync().await;

    assert!(common::is_quiet(&result), "unexpected work: {result:?}");
    assert!(!h.repo.exists("disk.iso"));
    assert!(!h.local_exists("remote.iso"));
}
