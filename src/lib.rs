//! Differential, point-in-time backup and restore of large sparse and
//! append-only files: content-addressed chunking, deduplication, and a
//! pluggable object store.
//!
//! This crate is the chunk engine (§1): sparse-aware file I/O, hashing,
//! the object store contract, a bounded worker pool, and the backup,
//! restore, and cataloging algorithms built on top of them. Object store
//! backends beyond the local filesystem, the command-line front-end, and
//! human-readable listing formatters are out of scope.

pub mod backup;
pub mod cache;
pub mod catalog;
pub mod chunk;
pub mod config;
pub mod counters;
pub mod error;
pub mod filter;
pub mod hash;
pub mod index;
pub mod pool;
pub mod restore;
pub mod sparse;
pub mod store;

pub use backup::{BackupEngine, BackupReport};
pub use cache::ChunkCache;
pub use catalog::SnapshotCatalog;
pub use chunk::Chunk;
pub use config::Config;
pub use counters::{BackupCounterSnapshot, RestoreCounterSnapshot};
pub use error::CoreError;
pub use filter::PathFilter;
pub use hash::{ChunkHasher, Version};
pub use index::{BackupIndex, FileEntry};
pub use pool::WorkerPool;
pub use restore::{RestoreEngine, RestoreReport};
pub use sparse::SparseFileView;
pub use store::{LocalObjectStore, ObjectStore};
