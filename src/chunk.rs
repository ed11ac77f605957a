//! The [`Chunk`] data model (§3): a fixed-size, content-addressed window
//! over a file.

use std::io::{Read, Write};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

/// One chunk of a file, as recorded in a [`crate::index::FileEntry`].
///
/// Invariants (§3): `end - start + 1 <= chunk_size`; the last chunk of a
/// file may be short; empty chunks carry no hash and no stored blob;
/// non-empty chunks carry a hex-encoded hash of their exact byte range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub start: u64,
    pub end: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub empty: bool,
    /// Hex content hash. Serialized as `contentSHA1` on the wire by
    /// default; the index codec (`crate::index`) rewrites this key to
    /// `contentSHA` for version v3 indexes (§6 version matrix) and accepts
    /// either spelling on read via the `contentSHA` alias below.
    #[serde(
        rename = "contentSHA1",
        alias = "contentSHA",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub content_hash: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Gzip-compresses a chunk's plaintext bytes for storage under
/// `chunks/<hash>` (§3 "Blob address": "both chunks and indexes are
/// gzip-compressed at rest"). The hash itself is always taken over the
/// plaintext, never the compressed bytes.
pub fn encode_blob(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).context("gzip-compressing chunk")?;
    encoder.finish().context("finishing gzip stream")
}

pub fn decode_blob(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).context("gunzipping chunk")?;
    Ok(out)
}

impl Chunk {
    pub fn empty(start: u64, end: u64) -> Chunk {
        Chunk {
            start,
            end,
            empty: true,
            content_hash: None,
        }
    }

    pub fn with_hash(start: u64, end: u64, hash: String) -> Chunk {
        Chunk {
            start,
            end,
            empty: false,
            content_hash: Some(hash),
        }
    }

    /// Number of bytes this chunk covers.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_is_inclusive() {
        let c = Chunk::with_hash(0, 7, "deadbeef".into());
        assert_eq!(c.len(), 8);
    }

    #[test]
    fn empty_chunk_has_no_hash() {
        let c = Chunk::empty(8, 15);
        assert!(c.empty);
        assert!(c.content_hash.is_none());
    }
}
