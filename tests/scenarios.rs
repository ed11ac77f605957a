//! End-to-end scenarios S1-S6, against a `LocalObjectStore` backed by a
//! `tempfile::TempDir`, in the style of
//! `examples/proxmox-proxmox-backup/tests/prune.rs` (black-box integration
//! tests living under `tests/`, one file per cohesive area).

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use coldvault::{
    BackupEngine, ChunkCache, ChunkHasher, LocalObjectStore, ObjectStore, PathFilter, RestoreEngine,
    Version,
};
use tempfile::tempdir;

const CHUNK_SIZE: u64 = 8;
const THREADS: usize = 4;
const TIMEOUT: Duration = Duration::from_secs(30);

fn fresh_store() -> (tempfile::TempDir, Arc<dyn ObjectStore>) {
    let dir = tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path().join("backend")).unwrap());
    (dir, store)
}

fn backup_engine(store: Arc<dyn ObjectStore>) -> BackupEngine {
    BackupEngine::new(
        store,
        ChunkCache::disabled(),
        ChunkHasher::new(Version::V2),
        CHUNK_SIZE,
        THREADS,
        TIMEOUT,
    )
}

fn restore_engine(store: Arc<dyn ObjectStore>) -> RestoreEngine {
    RestoreEngine::new(store, ChunkCache::disabled(), Version::V2, THREADS, TIMEOUT)
}

fn chunk_blob_count(store_root: &std::path::Path) -> usize {
    std::fs::read_dir(store_root.join("chunks"))
        .map(|dir| dir.count())
        .unwrap_or(0)
}

fn read_index(store: &Arc<dyn ObjectStore>, name: &str) -> coldvault::BackupIndex {
    let mut bytes = Vec::new();
    store.open_index(name).unwrap().read_to_end(&mut bytes).unwrap();
    coldvault::index::decode(&bytes).unwrap()
}

#[test]
fn s1_empty_file() {
    let (dir, store) = fresh_store();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("empty.bin"), b"").unwrap();

    let engine = backup_engine(Arc::clone(&store));
    let name = engine
        .run(&src, "t", BTreeMap::new(), &PathFilter::all(), &[])
        .unwrap()
        .name;

    assert_eq!(chunk_blob_count(&dir.path().join("backend")), 0);
    assert_eq!(
        std::fs::read_dir(dir.path().join("backend/indexes")).unwrap().count(),
        1
    );

    let index = read_index(&store, &name);
    let file = index.find_file("empty.bin").unwrap();
    assert_eq!(file.size, 0);
    assert!(file.chunks.is_empty());
}

#[test]
fn s2_single_non_empty_chunk_round_trips() {
    let (dir, store) = fresh_store();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("hello.txt"), b"hello").unwrap();

    let engine = backup_engine(Arc::clone(&store));
    let name = engine
        .run(&src, "t", BTreeMap::new(), &PathFilter::all(), &[])
        .unwrap()
        .name;

    let index = read_index(&store, &name);
    let chunk = &index.find_file("hello.txt").unwrap().chunks[0];
    assert_eq!(chunk.start, 0);
    assert_eq!(chunk.end, 4);
    assert!(!chunk.empty);
    assert_eq!(
        chunk.content_hash.as_deref(),
        Some("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d")
    );

    let dest = dir.path().join("dst");
    let restore = restore_engine(store);
    restore.run(&dest, &name, &PathFilter::all(), &[]).unwrap();
    assert_eq!(std::fs::read(dest.join("hello.txt")).unwrap(), b"hello");
}

#[test]
fn s3_sparse_file_uploads_exactly_two_chunks() {
    let (dir, store) = fresh_store();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"AAAAAAAA");
    bytes.extend_from_slice(&[0u8; 8]);
    bytes.extend_from_slice(b"BBBBBBBB");
    std::fs::write(src.join("sparse.bin"), &bytes).unwrap();

    let engine = backup_engine(Arc::clone(&store));
    let name = engine
        .run(&src, "t", BTreeMap::new(), &PathFilter::all(), &[])
        .unwrap()
        .name;

    let index = read_index(&store, &name);
    let chunks = &index.find_file("sparse.bin").unwrap().chunks;
    assert_eq!(chunks.len(), 3);
    assert!(!chunks[0].empty);
    assert!(chunks[1].empty);
    assert!(!chunks[2].empty);
    assert_eq!(chunk_blob_count(&dir.path().join("backend")), 2);
}

#[test]
fn s4_dedup_uploads_exactly_one_blob() {
    let (dir, store) = fresh_store();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("a.bin"), b"same_8bt").unwrap();
    std::fs::write(src.join("b.bin"), b"same_8bt").unwrap();

    let engine = backup_engine(Arc::clone(&store));
    let name = engine
        .run(&src, "t", BTreeMap::new(), &PathFilter::all(), &[])
        .unwrap()
        .name;

    assert_eq!(chunk_blob_count(&dir.path().join("backend")), 1);

    let index = read_index(&store, &name);
    let hash_a = index.find_file("a.bin").unwrap().chunks[0].content_hash.clone();
    let hash_b = index.find_file("b.bin").unwrap().chunks[0].content_hash.clone();
    assert_eq!(hash_a, hash_b);
}

#[test]
fn s5_append_only_fast_path_uploads_only_the_new_chunk() {
    let (dir, store) = fresh_store();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("log"), b"AAAAAAAABBBBBBBB").unwrap(); // 16 bytes, two chunks

    let append_only = vec!["log".to_string()];
    let engine = backup_engine(Arc::clone(&store));
    engine
        .run(&src, "t", BTreeMap::new(), &PathFilter::all(), &append_only)
        .unwrap();
    assert_eq!(chunk_blob_count(&dir.path().join("backend")), 2);

    let mut file = std::fs::OpenOptions::new().append(true).open(src.join("log")).unwrap();
    file.write_all(b"CCCCCCCC").unwrap();
    drop(file);

    let report2 = engine
        .run(&src, "t", BTreeMap::new(), &PathFilter::all(), &append_only)
        .unwrap();
    let name2 = report2.name;
    assert_eq!(chunk_blob_count(&dir.path().join("backend")), 3);
    assert_eq!(report2.counters.skipped, 2);

    let index = read_index(&store, &name2);
    let chunks = &index.find_file("log").unwrap().chunks;
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[2].content_hash.as_deref().map(str::len), Some(40));
}

#[test]
fn s6_corrupted_download_fails_restore_without_writing() {
    let (dir, store) = fresh_store();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("hello.txt"), b"hello").unwrap();

    let engine = backup_engine(Arc::clone(&store));
    let name = engine
        .run(&src, "t", BTreeMap::new(), &PathFilter::all(), &[])
        .unwrap()
        .name;

    // Corrupt the one chunk blob in place, gzip-wrapped like a real one so
    // the failure is a hash mismatch rather than a gunzip error.
    let chunks_dir = dir.path().join("backend/chunks");
    let hash_file = std::fs::read_dir(&chunks_dir).unwrap().next().unwrap().unwrap().path();
    let corrupted = coldvault::chunk::encode_blob(b"not hello").unwrap();
    std::fs::write(&hash_file, &corrupted).unwrap();

    let dest = dir.path().join("dst");
    let restore = restore_engine(store);
    let err = restore.run(&dest, &name, &PathFilter::all(), &[]).unwrap_err();
    assert!(format!("{:#}", err).contains("integrity"));
    // The destination is truncated to size before any chunk is fetched
    // (§7: partial side effects may remain), but the corrupted chunk's
    // bytes themselves are never written.
    let on_disk = std::fs::read(dest.join("hello.txt")).unwrap();
    assert_ne!(on_disk, b"hello");
}
