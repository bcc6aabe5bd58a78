//! Storage lifecycle tests against a temporary root.
//!
//! Covers the save/info/archive/processed/delete paths plus the guarantees the
//! intake layer depends on: oversized streams leave nothing behind and
//! concurrent movers of one path resolve to a single winner.

use std::sync::Arc;

use kyc_core::{Error, LifecycleState, UploadCandidate, ValidationErrorKind};
use kyc_store::{compute_content_hash, ContentAddressedStore};
use tempfile::TempDir;

fn store(dir: &TempDir) -> ContentAddressedStore {
    ContentAddressedStore::new(dir.path())
}

async fn save_bytes(store: &ContentAddressedStore, name: &str, data: &[u8]) -> kyc_core::StoredDocument {
    store
        .save(UploadCandidate::from_bytes(name, data.to_vec()), "cust-7", "passport")
        .await
        .expect("save should succeed")
}

fn count_files(dir: &std::path::Path) -> usize {
    if !dir.exists() {
        return 0;
    }
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .map(|p| if p.is_dir() { count_files(&p) } else { 1 })
        .sum()
}

#[tokio::test]
async fn test_digest_depends_only_on_bytes() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let data = b"%PDF-1.7 identical bytes";

    let a = save_bytes(&store, "first.pdf", data).await;
    let b = save_bytes(&store, "COMPLETELY-different name.pdf", data).await;

    assert_eq!(a.integrity_digest, compute_content_hash(data));
    assert_eq!(a.integrity_digest, b.integrity_digest);
    assert_ne!(a.stored_filename, b.stored_filename);
}

#[tokio::test]
async fn test_oversized_stream_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir).with_max_size(10).with_chunk_size(4);

    // Declared size lies; the streamed count is what gets enforced
    let candidate = UploadCandidate::new(
        Some("big.png".to_string()),
        3,
        std::io::Cursor::new(vec![0u8; 64]),
    );
    let err = store.save(candidate, "cust-7", "selfie").await.unwrap_err();

    match err {
        Error::Validation(v) => assert_eq!(v.kind, ValidationErrorKind::FileTooLarge),
        other => panic!("expected FileTooLarge, got {:?}", other),
    }
    assert_eq!(count_files(&dir.path().join("documents")), 0);
    assert_eq!(count_files(&dir.path().join("temp")), 0);
}

#[tokio::test]
async fn test_info_reconstructs_record() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let saved = save_bytes(&store, "scan.jpg", b"\xFF\xD8\xFF\xE0jpeg").await;

    let info = store.info(&saved.relative_path).await.expect("document exists");
    assert_eq!(info.id, saved.id);
    assert_eq!(info.byte_size, saved.byte_size);
    assert_eq!(info.integrity_digest, saved.integrity_digest);
    assert_eq!(info.lifecycle_state, LifecycleState::Uploaded);
    assert_eq!(info.declared_content_type, "image/jpeg");

    assert!(store.info("documents/cust-7/passport/missing.jpg").await.is_none());
    assert!(store.info("../outside.jpg").await.is_none());
}

#[tokio::test]
async fn test_verify_detects_tampering() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let saved = save_bytes(&store, "scan.png", b"original").await;

    assert!(store.verify(&saved.relative_path, &saved.integrity_digest).await);

    std::fs::write(dir.path().join(&saved.relative_path), b"tampered").unwrap();
    assert!(!store.verify(&saved.relative_path, &saved.integrity_digest).await);
}

#[tokio::test]
async fn test_lifecycle_moves_are_one_way() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let saved = save_bytes(&store, "id.pdf", b"%PDF-1.4").await;

    let processed = store
        .move_to_processed(&saved.relative_path)
        .await
        .expect("uploaded documents can be processed");
    assert_eq!(
        processed,
        format!("processed/cust-7/passport/{}", saved.stored_filename)
    );
    assert!(store.info(&saved.relative_path).await.is_none());

    // processed documents cannot be processed again
    assert!(store.move_to_processed(&processed).await.is_none());

    let archived = store.archive(&processed).await.expect("processed documents can be archived");
    assert!(archived.starts_with("archived/cust-7/passport/"));
    assert!(archived.ends_with(&format!("_{}", saved.stored_filename)));

    let info = store.info(&archived).await.unwrap();
    assert_eq!(info.lifecycle_state, LifecycleState::Archived);
    assert_eq!(info.id, saved.id);

    // archived is terminal
    assert!(store.archive(&archived).await.is_none());
    assert!(store.move_to_processed(&archived).await.is_none());
}

#[tokio::test]
async fn test_delete_hard_and_archive() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    let a = save_bytes(&store, "a.pdf", b"%PDF-a").await;
    assert!(store.delete(&a.relative_path, false).await);
    assert!(!store.delete(&a.relative_path, false).await);

    let b = save_bytes(&store, "b.pdf", b"%PDF-b").await;
    assert!(store.delete(&b.relative_path, true).await);
    assert_eq!(count_files(&dir.path().join("archived")), 1);
}

#[tokio::test]
async fn test_stats_counts_active_documents_only() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    assert_eq!(store.stats().await.file_count, 0);

    save_bytes(&store, "a.pdf", b"12345").await;
    let b = save_bytes(&store, "b.pdf", b"1234567890").await;
    store
        .save(UploadCandidate::from_bytes("c.png", vec![0; 3]), "cust-8", "selfie")
        .await
        .unwrap();

    let stats = store.stats().await;
    assert_eq!(stats.file_count, 3);
    assert_eq!(stats.total_bytes, 18);

    store.archive(&b.relative_path).await.unwrap();
    let stats = store.stats().await;
    assert_eq!(stats.file_count, 2);
    assert_eq!(stats.total_bytes, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_archive_has_single_winner() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(store(&dir));
    let saved = save_bytes(&store, "race.pdf", b"%PDF-race").await;

    let (s1, s2) = (Arc::clone(&store), Arc::clone(&store));
    let (p1, p2) = (saved.relative_path.clone(), saved.relative_path.clone());
    let (a, b) = tokio::join!(
        tokio::spawn(async move { s1.archive(&p1).await }),
        tokio::spawn(async move { s2.archive(&p2).await }),
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| o.is_some()).count(), 1);
    assert_eq!(count_files(&dir.path().join("archived")), 1);
    assert_eq!(count_files(&dir.path().join("documents")), 0);
}

#[tokio::test]
async fn test_layout_and_health_probe() {
    let dir = TempDir::new().unwrap();
    let store = ContentAddressedStore::new(dir.path().join("nested/root"));

    store.ensure_layout().await.unwrap();
    for partition in ["documents", "temp", "processed", "archived"] {
        assert!(store.root().join(partition).is_dir());
    }
    assert!(store.validate().await.is_ok());
    assert_eq!(count_files(&store.root().join("temp")), 0);
}
