//! [`ChunkCache`] (C4, §4.4): a second `ObjectStore` instance used as a
//! local, best-effort accelerator in front of the primary store.
//!
//! Grounded on `examples/original_source/lib/localcache.go`'s `LocalCache`
//! (an optional, directory-backed cache consulted before the remote
//! store) generalized to the full `ObjectStore` contract per §4.4, since
//! this crate's `ObjectStore` trait already has everything a local cache
//! needs — no separate, narrower cache trait is warranted.

use std::sync::Arc;

use crate::store::ObjectStore;

/// Wraps an optional backing [`ObjectStore`] with the mirror-on-backup /
/// consult-then-populate-on-restore semantics of §4.4. A cache with no
/// backing store behaves as permanently absent: every operation is a
/// harmless, logged no-op.
pub struct ChunkCache {
    backing: Option<Arc<dyn ObjectStore>>,
}

impl ChunkCache {
    pub fn disabled() -> Self {
        ChunkCache { backing: None }
    }

    pub fn enabled(backing: Arc<dyn ObjectStore>) -> Self {
        ChunkCache {
            backing: Some(backing),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backing.is_some()
    }

    /// Mirrors a chunk the backup engine just produced. Failures are
    /// logged and swallowed — the cache is never allowed to fail a backup
    /// (§4.4).
    pub fn mirror_on_backup(&self, hash: &str, bytes: &[u8]) {
        if let Some(store) = &self.backing {
            if let Err(err) = store.write_chunk(hash, bytes) {
                log::warn!("chunk cache: failed to mirror {}: {:#}", hash, err);
            }
        }
    }

    /// Consults the cache before the primary store on restore. Returns
    /// `None` on any miss or cache failure; the caller falls through to
    /// the primary store (§4.4).
    pub fn try_read(&self, hash: &str) -> Option<Vec<u8>> {
        let store = self.backing.as_ref()?;
        match store.chunk_exists(hash) {
            Ok(true) => (),
            Ok(false) => return None,
            Err(err) => {
                log::warn!("chunk cache: existence check failed for {}: {:#}", hash, err);
                return None;
            }
        }
        let mut reader = match store.open_chunk(hash) {
            Ok(reader) => reader,
            Err(err) => {
                log::warn!("chunk cache: failed to open cached {}: {:#}", hash, err);
                return None;
            }
        };
        let mut buf = Vec::new();
        match std::io::Read::read_to_end(&mut reader, &mut buf) {
            Ok(_) => Some(buf),
            Err(err) => {
                log::warn!("chunk cache: failed to read cached {}: {:#}", hash, err);
                None
            }
        }
    }

    /// Populates the cache after a primary-store hit on restore
    /// (best-effort, §4.4).
    pub fn populate_after_fallthrough(&self, hash: &str, bytes: &[u8]) {
        self.mirror_on_backup(hash, bytes);
    }
}
