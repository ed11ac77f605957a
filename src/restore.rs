//! [`RestoreEngine`] (C8, §4.8).
//!
//! Grounded on `examples/original_source/lib/restore.go`'s
//! `RestoreFromBackup`/`downloadFileFromChunks`: fetch and version-check
//! the index, then per file truncate to the snapshot's size and drive the
//! five-way per-chunk decision (skip-empty, punch-hole, skip-matching-hash,
//! fetch-verify-write) through the bounded worker pool.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::cache::ChunkCache;
use crate::config::Config;
use crate::counters::{humanize_bytes, RestoreCounterSnapshot, RestoreCounters};
use crate::error::CoreError;
use crate::filter::PathFilter;
use crate::hash::{ChunkHasher, Version};
use crate::index::{self, FileEntry};
use crate::pool::{Submission, WorkerPool};
use crate::sparse::SparseFileView;
use crate::store::ObjectStore;

/// Result of one [`RestoreEngine::run`]: the chunk-decision counters
/// accumulated across every restored file (§5, supplemented per
/// SPEC_FULL.md §4 from `examples/original_source/lib/restore.go`'s
/// per-file counters).
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub counters: RestoreCounterSnapshot,
}

pub struct RestoreEngine {
    store: Arc<dyn ObjectStore>,
    cache: Arc<ChunkCache>,
    hasher: ChunkHasher,
    threads: usize,
    transfer_timeout: Duration,
}

impl RestoreEngine {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        cache: ChunkCache,
        expected_version: Version,
        threads: usize,
        transfer_timeout: Duration,
    ) -> Self {
        RestoreEngine {
            store,
            cache: Arc::new(cache),
            hasher: ChunkHasher::new(expected_version),
            threads,
            transfer_timeout,
        }
    }

    /// Convenience constructor reading thread count and transfer timeout
    /// straight from a [`Config`].
    pub fn from_config(store: Arc<dyn ObjectStore>, cache: ChunkCache, expected_version: Version, config: &Config) -> Self {
        RestoreEngine::new(store, cache, expected_version, config.threads, config.transfer_timeout())
    }

    /// Restores `snapshot_name` into `destination` (§4.8).
    pub fn run(
        &self,
        destination: &Path,
        snapshot_name: &str,
        filter: &PathFilter,
        append_only: &[String],
    ) -> Result<RestoreReport> {
        let mut bytes = Vec::new();
        std::io::Read::read_to_end(
            &mut self
                .store
                .open_index(snapshot_name)
                .with_context(|| format!("opening index {}", snapshot_name))?,
            &mut bytes,
        )
        .with_context(|| format!("reading index {}", snapshot_name))?;
        let manifest = index::decode(&bytes).with_context(|| format!("decoding index {}", snapshot_name))?;
        manifest.require_version(self.hasher.version())?;

        let mut totals = RestoreCounterSnapshot::default();
        for file in manifest.filtered_files(filter) {
            let counters = self
                .restore_file(destination, file, append_only)
                .with_context(|| format!("restoring {}", file.filename))?;
            totals += counters;
        }

        Ok(RestoreReport { counters: totals })
    }

    fn restore_file(
        &self,
        destination: &Path,
        file: &FileEntry,
        append_only: &[String],
    ) -> Result<RestoreCounterSnapshot> {
        let dest_path = destination.join(&file.filename);
        let is_append_only = append_only.iter().any(|p| p == &file.filename);

        let view = Arc::new(SparseFileView::open_write(&dest_path)?);
        let original_size = view.size()?;
        view.truncate(file.size)?;

        if is_append_only && original_size >= file.size {
            log::debug!(
                "{}: treated as append-only, already at or beyond snapshot size {}",
                file.filename,
                humanize_bytes(file.size)
            );
            return Ok(RestoreCounterSnapshot::default());
        }

        let counters = Arc::new(RestoreCounters::default());
        let pool = WorkerPool::new(self.threads.max(1));
        for chunk in &file.chunks {
            if is_append_only && original_size > chunk.end {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let view = Arc::clone(&view);
            let store = Arc::clone(&self.store);
            let cache = Arc::clone(&self.cache);
            let counters = Arc::clone(&counters);
            let chunk = chunk.clone();
            let timeout = self.transfer_timeout;
            let hasher = self.hasher;

            let outcome =
                pool.try_submit(move || restore_chunk(&view, &store, &cache, &chunk, hasher, timeout, &counters));
            if outcome == Submission::Stop {
                break;
            }
        }
        pool.wait()?;

        if let Some(missing) = view.capability_missing() {
            log::warn!("{}", missing);
        }

        let snapshot = counters.snapshot();
        log::debug!(
            "{}: {} ({} empty, {} correct, {} skipped, {} hole-punched, {} fetched)",
            file.filename,
            humanize_bytes(file.size),
            snapshot.empty,
            snapshot.correct,
            snapshot.skipped,
            snapshot.punched,
            snapshot.fetched
        );

        Ok(snapshot)
    }
}

fn restore_chunk(
    view: &SparseFileView,
    store: &Arc<dyn ObjectStore>,
    cache: &ChunkCache,
    chunk: &crate::chunk::Chunk,
    hasher: ChunkHasher,
    timeout: Duration,
    counters: &RestoreCounters,
) -> Result<()> {
    let len = chunk.len();
    let (local_bytes, local_empty) = view.read_chunk(chunk.start, len)?;

    match (chunk.empty, local_empty) {
        (true, true) => {
            counters.empty.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        (true, false) => {
            counters.punched.fetch_add(1, Ordering::Relaxed);
            view.punch_hole(chunk.start, len)
        }
        (false, false) => {
            let expected = chunk.content_hash.as_deref().unwrap_or_default();
            if hasher.hash(&local_bytes) == expected {
                counters.correct.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            fetch_and_write(view, store, cache, chunk, hasher, timeout)?;
            counters.fetched.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        (false, true) => {
            fetch_and_write(view, store, cache, chunk, hasher, timeout)?;
            counters.fetched.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }
}

fn fetch_and_write(
    view: &SparseFileView,
    store: &Arc<dyn ObjectStore>,
    cache: &ChunkCache,
    chunk: &crate::chunk::Chunk,
    hasher: ChunkHasher,
    timeout: Duration,
) -> Result<()> {
    let expected = chunk
        .content_hash
        .clone()
        .context("non-empty chunk is missing its content hash")?;

    let (blob, from_cache) = match cache.try_read(&expected) {
        Some(blob) => (blob, true),
        None => {
            let store = Arc::clone(store);
            let hash = expected.clone();
            let blob = run_with_timeout(timeout, move || {
                let mut reader = store
                    .open_chunk(&hash)
                    .map_err(|_| CoreError::ChunkNotFound { hash: hash.clone() })?;
                let mut buf = Vec::new();
                std::io::Read::read_to_end(&mut reader, &mut buf)?;
                Ok(buf)
            })?;
            (blob, false)
        }
    };

    if !from_cache {
        cache.populate_after_fallthrough(&expected, &blob);
    }

    let bytes = crate::chunk::decode_blob(&blob).context("decompressing fetched chunk")?;

    let got = hasher.hash(&bytes);
    if got != expected {
        bail!(CoreError::IntegrityMismatch {
            hash: expected.clone(),
            expected,
            got,
        });
    }

    view.write_chunk(chunk.start, &bytes)
}

fn run_with_timeout<F>(timeout: Duration, f: F) -> Result<Vec<u8>>
where
    F: FnOnce() -> Result<Vec<u8>> + Send + 'static,
{
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => bail!("chunk fetch timed out after {:?}", timeout),
    }
}
