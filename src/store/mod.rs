//! The [`ObjectStore`] contract (C3, §4.3) and its local-filesystem
//! implementation.
//!
//! Grounded on `examples/original_source/lib/storage.go`'s `Storage`
//! interface: the same seven operations, with the same not-found
//! convention (`chunk_exists` returns `false`, `open_*` fails explicitly).
//! Backends are selected by URL scheme at construction time (§9
//! "Interface-over-store"); this crate ships the local filesystem backend
//! (`local`), the only one the Non-goals (§1) require.

pub mod local;

use std::io::Read;

use anyhow::Result;

pub use local::LocalObjectStore;

/// Abstract content/index store consumed by the backup and restore
/// engines, and reused (pointed at a second location) as the
/// [`crate::cache::ChunkCache`].
pub trait ObjectStore: Send + Sync {
    /// Snapshot names under `prefix`, sorted ascending, at most `limit`
    /// entries after skipping `offset` (§4.3, §4.9).
    fn list_indexes(&self, limit: usize, offset: usize, prefix: &str) -> Result<Vec<String>>;

    fn open_index(&self, name: &str) -> Result<Box<dyn Read>>;
    fn write_index(&self, name: &str, bytes: &[u8]) -> Result<()>;

    fn open_chunk(&self, hash: &str) -> Result<Box<dyn Read>>;
    fn write_chunk(&self, hash: &str, bytes: &[u8]) -> Result<()>;
    /// `false` for a missing blob, never an error (§4.3).
    fn chunk_exists(&self, hash: &str) -> Result<bool>;
}
