//! [`BackupIndex`] and [`FileEntry`] (§3, §4.5): the in-memory model of one
//! snapshot, plus its YAML+gzip wire codec (§6).
//!
//! Wire format is fixed by §6: `version`, `date` (RFC-3339), `tag`, `meta`,
//! `chunk_size`, `files` at the top level; each file entry carries
//! `filename`, `date`, `size`, `chunks`. The hash field name inside each
//! chunk depends on the index [`Version`] (`contentSHA1` for v2,
//! `contentSHA` for v3); [`Chunk`] always serializes as `contentSHA1`
//! internally, so [`encode`]/[`decode`] rewrite that one key at the
//! `serde_yaml::Value` level rather than duplicating the whole struct tree
//! per version — the only part of the wire format genuinely version-shaped.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::chunk::Chunk;
use crate::error::CoreError;
use crate::filter::PathFilter;
use crate::hash::Version;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub filename: String,
    pub date: DateTime<Utc>,
    pub size: u64,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

impl FileEntry {
    /// Estimated on-disk size: sum of the byte ranges of non-empty chunks
    /// (§4.5).
    pub fn estimated_size(&self) -> u64 {
        self.chunks
            .iter()
            .filter(|c| !c.empty)
            .map(|c| c.len())
            .sum()
    }

    /// §8 invariant 1: chunks tile `[0, size)` exactly with no gaps or
    /// overlaps, and the chunk list is empty iff size is zero.
    pub fn chunks_tile_exactly(&self) -> bool {
        if self.size == 0 {
            return self.chunks.is_empty();
        }
        if self.chunks.is_empty() {
            return false;
        }
        if self.chunks[0].start != 0 {
            return false;
        }
        for pair in self.chunks.windows(2) {
            if pair[1].start != pair[0].end + 1 {
                return false;
            }
        }
        self.chunks.last().unwrap().end == self.size - 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupIndex {
    pub version: String,
    pub date: DateTime<Utc>,
    pub tag: String,
    #[serde(default)]
    pub meta: BTreeMap<String, JsonValue>,
    pub chunk_size: u64,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl BackupIndex {
    pub fn new(version: Version, tag: String, meta: BTreeMap<String, JsonValue>, chunk_size: u64) -> Self {
        BackupIndex {
            version: version.as_str().to_string(),
            date: Utc::now(),
            tag,
            meta,
            chunk_size,
            files: Vec::new(),
        }
    }

    pub fn version(&self) -> Option<Version> {
        Version::parse(&self.version)
    }

    /// Refuses an index whose version does not match `expected` (§3, §7,
    /// §8 invariant 7).
    pub fn require_version(&self, expected: Version) -> Result<()> {
        match self.version() {
            Some(v) if v == expected => Ok(()),
            _ => Err(CoreError::VersionMismatch {
                expected: expected.as_str().to_string(),
                found: self.version.clone(),
            }
            .into()),
        }
    }

    /// Locates a FileEntry by relative path (§4.5).
    pub fn find_file(&self, relative_path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.filename == relative_path)
    }

    /// Files passing `filter` (§4.5: include AND NOT exclude).
    pub fn filtered_files(&self, filter: &PathFilter) -> Vec<&FileEntry> {
        self.files
            .iter()
            .filter(|f| filter.matches(&f.filename))
            .collect()
    }
}

/// Encodes a [`BackupIndex`] to its wire representation: YAML, with the
/// chunk hash field renamed for non-v2 versions, gzip-compressed.
pub fn encode(index: &BackupIndex) -> Result<Vec<u8>> {
    let version = index
        .version()
        .with_context(|| format!("unknown index version {:?}", index.version))?;

    let mut value = serde_yaml::to_value(index).context("serializing backup index to yaml")?;
    if version != Version::V2 {
        rename_hash_field(&mut value, "contentSHA1", "contentSHA");
    }

    let yaml = serde_yaml::to_string(&value).context("rendering backup index yaml")?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(yaml.as_bytes())
        .context("gzip-compressing backup index")?;
    encoder.finish().context("finishing gzip stream")
}

/// Decodes a gzip+YAML index blob back into a [`BackupIndex`].
pub fn decode(bytes: &[u8]) -> Result<BackupIndex> {
    let mut decoder = GzDecoder::new(bytes);
    let mut yaml = String::new();
    decoder
        .read_to_string(&mut yaml)
        .context("gunzipping backup index")?;

    let mut value: serde_yaml::Value =
        serde_yaml::from_str(&yaml).context("parsing backup index yaml")?;
    // Accept either hash field name regardless of the declared version;
    // `Chunk`'s `alias` attribute also does this, but normalizing here
    // keeps the wire-quirk handling in one place.
    rename_hash_field(&mut value, "contentSHA", "contentSHA1");

    serde_yaml::from_value(value).context("decoding backup index")
}

/// Walks `files[].chunks[]` and renames `from` to `to` wherever present.
fn rename_hash_field(value: &mut serde_yaml::Value, from: &str, to: &str) {
    if let Some(files) = value
        .as_mapping_mut()
        .and_then(|m| m.get_mut(&serde_yaml::Value::String("files".into())))
        .and_then(|v| v.as_sequence_mut())
    {
        for file in files {
            if let Some(chunks) = file
                .as_mapping_mut()
                .and_then(|m| m.get_mut(&serde_yaml::Value::String("chunks".into())))
                .and_then(|v| v.as_sequence_mut())
            {
                for chunk in chunks {
                    if let Some(map) = chunk.as_mapping_mut() {
                        let key_from = serde_yaml::Value::String(from.to_string());
                        if let Some(v) = map.remove(&key_from) {
                            map.insert(serde_yaml::Value::String(to.to_string()), v);
                        }
                    }
                }
            }
        }
    }
}

/// Formats a [`BackupIndex`]'s creation time + tag into the primary-key
/// snapshot name (§3): `YYYY-MM-DD-HH-MM-SS--tag`.
///
/// This builds the name directly from its parts rather than stripping a
/// trailing suffix off some other string, so there is nothing to over-trim
/// the way a naive character-class trim of `.yaml.gz` would.
pub fn format_snapshot_name(date: DateTime<Utc>, tag: &str) -> String {
    use chrono::SecondsFormat;
    // `true` forces the "Z" UTC designator instead of "+00:00", which the
    // T/:/Z rewrite below assumes.
    let formatted = date.to_rfc3339_opts(SecondsFormat::Secs, true);
    let formatted = formatted.replace('T', "-").replace(':', "-").replace('Z', "");
    format!("{}--{}", formatted, tag)
}

/// Extracts the tag suffix from a snapshot name, for `--tag` lookups.
pub fn snapshot_tag(name: &str) -> Option<&str> {
    name.split_once("--").map(|(_, tag)| tag)
}

pub fn validate_snapshot_name(name: &str) -> Result<()> {
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_');
    if !valid {
        bail!("invalid snapshot name {:?}: only alphanumerics, '-', '.', '_' allowed", name);
    }
    Ok(())
}
