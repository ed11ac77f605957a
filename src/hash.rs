//! Content hashing (§4.2, §6 version matrix).
//!
//! A backup always hashes with exactly one algorithm, fixed by the index
//! [`Version`] in use. `sha1`/`sha3` (RustCrypto) are used instead of the
//! teacher's `openssl` bindings: both are pure-Rust, already used for
//! content-addressing in sibling pack repos (`changweige-image-service`,
//! `tvlfyi-tvix`), and avoid linking OpenSSL into a crate that otherwise has
//! no TLS/crypto surface of its own (encryption is a non-goal, §1).

use sha1::Sha1;
use sha3::{Digest, Sha3_256};

/// Index format discriminator and the hash algorithm it pins (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// SHA-1 (160-bit), field `contentSHA1`.
    V2,
    /// SHA3-256, field `contentSHA`.
    V3,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V2 => "v2",
            Version::V3 => "v3",
        }
    }

    pub fn parse(s: &str) -> Option<Version> {
        match s {
            "v2" => Some(Version::V2),
            "v3" => Some(Version::V3),
            _ => None,
        }
    }
}

/// A pure function mapping a chunk's bytes to a hex-encoded digest under a
/// single fixed algorithm (§4.2). `is_empty` is a separate, cheap classifier:
/// short-circuits on the first non-zero byte.
#[derive(Debug, Clone, Copy)]
pub struct ChunkHasher {
    version: Version,
}

impl ChunkHasher {
    pub fn new(version: Version) -> Self {
        ChunkHasher { version }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Hex-encoded content hash of `bytes` under this hasher's algorithm.
    pub fn hash(&self, bytes: &[u8]) -> String {
        match self.version {
            Version::V2 => {
                let mut hasher = Sha1::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
            Version::V3 => {
                let mut hasher = Sha3_256::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
        }
    }

    /// True iff every byte in `bytes` is zero. An empty slice is vacuously
    /// empty. Short-circuits on the first non-zero byte.
    pub fn is_empty(bytes: &[u8]) -> bool {
        bytes.iter().all(|&b| b == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_matches_known_vector() {
        let hasher = ChunkHasher::new(Version::V2);
        // S2 in §8: sha1("hello") = aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d
        assert_eq!(
            hasher.hash(b"hello"),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }

    #[test]
    fn empty_classification() {
        assert!(ChunkHasher::is_empty(&[]));
        assert!(ChunkHasher::is_empty(&[0u8; 64]));
        assert!(!ChunkHasher::is_empty(&[0u8, 0u8, 1u8]));
    }

    #[test]
    fn version_round_trips_through_str() {
        assert_eq!(Version::parse("v2"), Some(Version::V2));
        assert_eq!(Version::parse("v3"), Some(Version::V3));
        assert_eq!(Version::parse("v9"), None);
        assert_eq!(Version::V2.as_str(), "v2");
    }
}
