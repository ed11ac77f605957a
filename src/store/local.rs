//! Local filesystem [`ObjectStore`] (§4.3, §6): the reference backend,
//! laying indexes and chunks out exactly as
//! `examples/original_source/lib/storage.go`'s `DStoreStorage` does against
//! a `dstore.Store` rooted at a base URL — `indexes/<name>.yaml.gz` and
//! `chunks/<hash>`, just against a plain directory instead of a pluggable
//! blob store.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};

use super::ObjectStore;

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("indexes"))
            .with_context(|| format!("creating {}/indexes", root.display()))?;
        fs::create_dir_all(root.join("chunks"))
            .with_context(|| format!("creating {}/chunks", root.display()))?;
        Ok(LocalObjectStore { root })
    }

    fn index_path(&self, name: &str) -> PathBuf {
        self.root.join("indexes").join(format!("{}.yaml.gz", name))
    }

    fn chunk_path(&self, hash: &str) -> PathBuf {
        self.root.join("chunks").join(hash)
    }
}

impl ObjectStore for LocalObjectStore {
    fn list_indexes(&self, limit: usize, offset: usize, prefix: &str) -> Result<Vec<String>> {
        let dir = self.root.join("indexes");
        let mut names: Vec<String> = fs::read_dir(&dir)
            .with_context(|| format!("listing {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|file_name| file_name.strip_suffix(".yaml.gz").map(str::to_string))
            .filter(|name| name.starts_with(prefix))
            .collect();
        names.sort();
        Ok(names.into_iter().skip(offset).take(limit).collect())
    }

    fn open_index(&self, name: &str) -> Result<Box<dyn Read>> {
        let path = self.index_path(name);
        let file = File::open(&path).with_context(|| format!("opening index {}", path.display()))?;
        Ok(Box::new(file))
    }

    fn write_index(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.index_path(name);
        write_atomically(&path, bytes)
    }

    fn open_chunk(&self, hash: &str) -> Result<Box<dyn Read>> {
        let path = self.chunk_path(hash);
        let file = File::open(&path).with_context(|| format!("opening chunk {}", path.display()))?;
        Ok(Box::new(file))
    }

    fn write_chunk(&self, hash: &str, bytes: &[u8]) -> Result<()> {
        let path = self.chunk_path(hash);
        write_atomically(&path, bytes)
    }

    fn chunk_exists(&self, hash: &str) -> Result<bool> {
        Ok(self.chunk_path(hash).is_file())
    }
}

/// Writes via a sibling temp file then renames into place, so a reader
/// never observes a partially-written blob.
///
/// The temp name is suffixed with the process id and a per-process counter,
/// not just the target's own name: two worker threads backing up two chunks
/// with identical content (the same hash) race to write the same blob, and
/// with a name derived only from `path` their renames would collide (the
/// second `rename` hitting `ENOENT` once the first has already moved its
/// temp file away). Per §3 that race must stay harmless.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique));
    fs::write(&tmp_path, bytes).with_context(|| format!("writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {} to {}", tmp_path.display(), path.display()))
}
