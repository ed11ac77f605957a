//! Crate-wide error types.
//!
//! Most code in this crate propagates `anyhow::Error`, matching the rest of
//! the pack. [`CoreError`] exists for the small set of failure kinds a
//! caller might want to match on by name (§7 of the design): integrity
//! failures, version mismatches, and missing filesystem capabilities. These
//! are constructed with `thiserror` and converted into `anyhow::Error` at
//! call sites via `?` like any other error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("index version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("integrity check failed for chunk {hash}: expected {expected}, got {got}")]
    IntegrityMismatch {
        hash: String,
        expected: String,
        got: String,
    },

    #[error("chunk {hash} not found in object store or cache")]
    ChunkNotFound { hash: String },

    #[error("no snapshot found matching tag {tag:?}")]
    NoSnapshotForTag { tag: String },

    #[error("filesystem does not support {capability} for {path}")]
    CapabilityMissing { capability: &'static str, path: String },
}
