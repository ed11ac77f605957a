//! Runtime configuration.
//!
//! A plain, `serde`-derived settings struct loadable from an optional TOML
//! file and overridable by CLI flags. This deliberately does not use the
//! PBS section-config/schema machinery: that system is bound to a running
//! API daemon and has no meaning for a standalone chunk-engine crate.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default worker-pool capacity (§6: "threads, default 24").
pub const DEFAULT_THREADS: usize = 24;
/// Default chunk size in MiB (§6: "chunk size, default 50").
pub const DEFAULT_CHUNK_SIZE_MIB: u64 = 50;
/// Default per-chunk store operation timeout, in seconds (§6: default 300).
pub const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chunk size in MiB, applied to every chunk but possibly the last one
    /// of each file.
    pub chunk_size_mib: u64,
    /// Worker-pool capacity.
    pub threads: usize,
    /// Per-chunk store operation timeout, in seconds.
    pub transfer_timeout_secs: u64,
    /// Enables the local second-tier `ChunkCache`.
    pub cache_enabled: bool,
    /// Filesystem path (or store URL) backing the cache, when enabled.
    pub cache_url: Option<String>,
    /// Relative paths treated as append-only (see §4.7/§4.8).
    pub append_only_files: Vec<String>,
    /// Suffix applied to snapshot names created by this invocation.
    pub backup_tag: String,
    /// Opaque metadata stored in the index, round-tripped verbatim.
    pub metadata: BTreeMap<String, Value>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chunk_size_mib: DEFAULT_CHUNK_SIZE_MIB,
            threads: DEFAULT_THREADS,
            transfer_timeout_secs: DEFAULT_TRANSFER_TIMEOUT_SECS,
            cache_enabled: false,
            cache_url: None,
            append_only_files: Vec::new(),
            backup_tag: String::from("default"),
            metadata: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Chunk size in bytes, the unit every other component actually uses.
    pub fn chunk_size(&self) -> usize {
        (self.chunk_size_mib as usize) * 1024 * 1024
    }

    pub fn transfer_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.transfer_timeout_secs)
    }

    /// Loads a config file, falling back to defaults for anything unset.
    /// Missing files are not an error; a missing file just yields defaults.
    pub fn load(path: &Path) -> Result<Config> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                toml::from_str(&contents).with_context(|| format!("parsing config {:?}", path))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(err) => Err(err).with_context(|| format!("reading config {:?}", path)),
        }
    }

    pub fn is_append_only(&self, relative_path: &str) -> bool {
        self.append_only_files.iter().any(|p| p == relative_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.chunk_size(), 50 * 1024 * 1024);
        assert_eq!(cfg.threads, 24);
        assert_eq!(cfg.transfer_timeout_secs, 300);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/coldvault.toml")).unwrap();
        assert_eq!(cfg.chunk_size_mib, DEFAULT_CHUNK_SIZE_MIB);
    }

    #[test]
    fn append_only_membership() {
        let mut cfg = Config::default();
        cfg.append_only_files.push("var/log.bin".to_string());
        assert!(cfg.is_append_only("var/log.bin"));
        assert!(!cfg.is_append_only("var/other.bin"));
    }
}
