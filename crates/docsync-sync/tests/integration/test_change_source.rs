//! Remote discovery
//!
//! - The change feed is read page by page until exhausted
//! - Remote moves are mirrored by renaming the local entry
//! - A move the local tree cannot mirror falls back to delete and download
//! - Events outside the synchronized folder are ignored
//! - A repository without history falls back to crawling every pass
//! - A relocated local root is re-anchored without transfers

use docsync_core::ports::IStateCache;

use crate::common::{is_quiet, Harness};

#[tokio::test]
async fn test_paged_change_feed_is_read_to_the_end() {
    let mut h = Harness::new().await;
    h.settings.change_page_size = 2;
    h.sync().await;

    for i in 0..5 {
        h.repo.put_file(&format!("f{i}.txt"), format!("file {i}").as_bytes());
    }
    let result = h.sync().await;

    assert_eq!(result.downloads, 5);
    assert_eq!(
        h.local_names(""),
        vec!["f0.txt", "f1.txt", "f2.txt", "f3.txt", "f4.txt"]
    );
    let settled = h.sync().await;
    assert!(is_quiet(&settled), "unexpected work: {settled:?}");
}

#[tokio::test]
async fn test_remote_folder_move_is_mirrored() {
    let h = Harness::new().await;
    h.repo.put_folder("A");
    h.repo.put_file("A/b.txt", b"moved content");
    h.sync().await;
    let id = h.record("A/b.txt").await.unwrap().remote_id;
    let fetched = h.repo.content_calls();

    // The feed reports only the moved folder
    h.repo.rename("A", "B");
    let result = h.sync().await;

    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.moves, 1);
    assert_eq!(result.deletes, 0);
    assert_eq!(result.downloads, 0);
    assert_eq!(h.repo.content_calls(), fetched);
    assert!(!h.local_exists("A"));
    assert_eq!(h.read_local("B/b.txt").as_deref(), Some(&b"moved content"[..]));
    assert!(h.record("A").await.is_none());
    assert!(h.record("A/b.txt").await.is_none());
    assert_eq!(h.record("B/b.txt").await.unwrap().remote_id, id);

    let settled = h.sync().await;
    assert!(is_quiet(&settled), "unexpected work: {settled:?}");
}

#[tokio::test]
async fn test_local_edit_follows_remote_rename() {
    let h = Harness::new().await;
    h.repo.put_folder("A");
    h.repo.put_file("A/b.txt", b"original");
    h.sync().await;

    h.write_local("A/b.txt", b"local edit");
    h.repo.rename("A", "B");
    let result = h.sync().await;

    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.moves, 1);
    assert_eq!(result.uploads, 1);
    assert_eq!(result.conflicts, 0);
    assert_eq!(h.repo.content("B/b.txt").as_deref(), Some(&b"local edit"[..]));
    assert!(!h.repo.exists("A"));
    assert!(!h.local_exists("A"));
    assert_eq!(h.read_local("B/b.txt").as_deref(), Some(&b"local edit"[..]));

    let settled = h.sync().await;
    assert!(is_quiet(&settled), "unexpected work: {settled:?}");
    assert!(!h.repo.exists("A"));
}

#[tokio::test]
async fn test_move_of_locally_deleted_folder_downloads_new_location() {
    let h = Harness::new().await;
    h.repo.put_folder("A");
    h.repo.put_file("A/b.txt", b"hello");
    h.sync().await;

    std::fs::remove_dir_all(h.local("A")).unwrap();
    h.repo.rename("A", "B");
    let result = h.sync().await;

    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.moves, 0);
    assert_eq!(result.downloads, 2);
    assert!(!h.local_exists("A"));
    assert!(!h.repo.exists("A"));
    assert_eq!(h.read_local("B/b.txt").as_deref(), Some(&b"hello"[..]));
    assert!(h.record("A/b.txt").await.is_none());
}

#[tokio::test]
async fn test_changes_outside_root_are_ignored() {
    let h = Harness::new().await;
    h.sync().await;

    h.repo.put_folder("inside");
    h.repo.put_outside("/other/secret.txt", b"not ours");
    let result = h.sync().await;

    assert_eq!(result.downloads, 1);
    assert_eq!(h.local_names(""), vec!["inside"]);
}

#[tokio::test]
async fn test_repository_without_history_crawls_every_pass() {
    let h = Harness::new().await;
    h.repo.set_no_history(true);
    h.repo.put_file("doc.txt", b"hello");

    let first = h.sync().await;
    assert_eq!(first.downloads, 1);

    let second = h.sync().await;
    assert!(is_quiet(&second), "unexpected work: {second:?}");

    h.repo.remove("doc.txt");
    let third = h.sync().await;
    assert_eq!(third.deletes, 1);
    assert!(!h.local_exists("doc.txt"));
}

#[tokio::test]
async fn test_relocated_root_is_reanchored() {
    let mut h = Harness::new().await;
    h.repo.put_folder("A");
    h.repo.put_file("A/b.txt", b"hello");
    h.sync().await;

    let moved = h.dir.path().join("moved");
    std::fs::rename(h.root(), &moved).unwrap();
    h.settings.root = moved.clone();

    let result = h.sync().await;

    assert!(is_quiet(&result), "unexpected work: {result:?}");
    assert_eq!(h.read_local("A/b.txt").as_deref(), Some(&b"hello"[..]));
    let prefix = h.cache.get_path_prefix().await.unwrap().unwrap();
    assert_eq!(prefix.as_path(), moved.as_path());
}
