//! [`SnapshotCatalog`] (C9, §4.9): naming, listing, and tag resolution over
//! an [`ObjectStore`]'s indexes.
//!
//! Grounded on `examples/original_source/lib/list.go`'s `GetLatestBackup`
//! (ascending-sort-then-take-last tag resolution) and `lib/pitreos.go`'s
//! listing helpers, generalized to the `limit`/`offset`/`prefix` paging and
//! optional metadata decoding this crate's catalog listing (§4.9) supports.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;

use crate::error::CoreError;
use crate::index;
use crate::store::ObjectStore;

#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub metadata: Option<BTreeMap<String, JsonValue>>,
}

pub struct SnapshotCatalog {
    store: Arc<dyn ObjectStore>,
}

impl SnapshotCatalog {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        SnapshotCatalog { store }
    }

    /// The most recent snapshot whose name ends with `--<tag>` (§3, §4.9).
    /// Names sort lexicographically in chronological order thanks to their
    /// date prefix, so "most recent matching tag" is "last matching name
    /// in ascending order".
    pub fn get_latest(&self, tag: &str) -> Result<String> {
        let suffix = format!("--{}", tag);
        let names = self.store.list_indexes(usize::MAX, 0, "")?;
        names
            .into_iter()
            .filter(|name| name.ends_with(&suffix))
            .last()
            .ok_or_else(|| {
                CoreError::NoSnapshotForTag {
                    tag: tag.to_string(),
                }
                .into()
            })
    }

    /// Lists snapshots under `prefix`, optionally decoding each index to
    /// surface its metadata map (§4.9).
    pub fn list(
        &self,
        limit: usize,
        offset: usize,
        prefix: &str,
        include_metadata: bool,
    ) -> Result<Vec<Entry>> {
        let names = self.store.list_indexes(limit, offset, prefix)?;
        names
            .into_iter()
            .map(|name| {
                let metadata = if include_metadata {
                    Some(self.read_metadata(&name)?)
                } else {
                    None
                };
                Ok(Entry { name, metadata })
            })
            .collect()
    }

    fn read_metadata(&self, name: &str) -> Result<BTreeMap<String, JsonValue>> {
        let mut bytes = Vec::new();
        self.store
            .open_index(name)
            .with_context(|| format!("opening index {}", name))?
            .read_to_end(&mut bytes)
            .with_context(|| format!("reading index {}", name))?;
        let decoded = index::decode(&bytes).with_context(|| format!("decoding index {}", name))?;
        Ok(decoded.meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Version;
    use crate::index::BackupIndex;
    use crate::store::LocalObjectStore;
    use tempfile::tempdir;

    fn write_index(store: &LocalObjectStore, name: &str, tag: &str) {
        let idx = BackupIndex::new(Version::V3, tag.to_string(), BTreeMap::new(), 1024);
        let bytes = index::encode(&idx).unwrap();
        store.write_index(name, &bytes).unwrap();
    }

    #[test]
    fn latest_picks_last_matching_tag() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalObjectStore::new(dir.path()).unwrap());
        write_index(&store, "2024-01-01-00-00-00--nightly", "nightly");
        write_index(&store, "2024-01-02-00-00-00--nightly", "nightly");
        write_index(&store, "2024-01-02-12-00-00--weekly", "weekly");

        let catalog = SnapshotCatalog::new(store);
        assert_eq!(catalog.get_latest("nightly").unwrap(), "2024-01-02-00-00-00--nightly");
        assert_eq!(catalog.get_latest("weekly").unwrap(), "2024-01-02-12-00-00--weekly");
        assert!(catalog.get_latest("missing").is_err());
    }

    #[test]
    fn list_with_metadata_decodes_each_index() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalObjectStore::new(dir.path()).unwrap());
        write_index(&store, "2024-01-01-00-00-00--nightly", "nightly");

        let catalog = SnapshotCatalog::new(store);
        let entries = catalog.list(10, 0, "", true).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].metadata.is_some());
    }
}
