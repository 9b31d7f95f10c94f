//! ContentHash: a SHA-256 digest encoded as 64 lowercase hex characters.
//!
//! The digest is the identity of a blob. Identical bytes always produce the
//! same hash no matter how they were chunked on the way in, which is what
//! makes deduplication work.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Length of the hex encoding of a digest.
pub const HASH_HEX_LEN: usize = 64;

/// Hex characters consumed by each shard directory level.
pub const SHARD_WIDTH: usize = 2;

/// A content hash - 256 bits (32 bytes, 64 hex chars) of SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

/// Errors that can occur when parsing content hashes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashError {
    #[error("invalid hash length: expected 64 hex chars, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex character in hash")]
    InvalidHex,
}

impl ContentHash {
    /// Hash a complete buffer.
    pub fn from_data(data: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Create from an existing hash string (validates format).
    ///
    /// Upper-case hex is accepted and normalized to lower case.
    pub fn from_str_checked(s: &str) -> Result<Self, HashError> {
        if s.len() != HASH_HEX_LEN {
            return Err(HashError::InvalidLength(s.len()));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Shard directory names for the given depth, outermost first.
    pub fn shards(&self, depth: usize) -> impl Iterator<Item = &str> {
        (0..depth).map(move |level| &self.0[level * SHARD_WIDTH..(level + 1) * SHARD_WIDTH])
    }

    /// The part of the hash left over after `depth` shard levels (used as filename).
    pub fn remainder(&self, depth: usize) -> &str {
        &self.0[depth * SHARD_WIDTH..]
    }

    /// Path of this hash relative to a sharded root.
    ///
    /// With depth 3, `f29bc64a...` becomes `f2/9b/c6/4a...`.
    pub fn relative_path(&self, depth: usize) -> PathBuf {
        let mut path: PathBuf = self.shards(depth).collect();
        path.push(self.remainder(depth));
        path
    }

    /// First ten characters, for log lines and terminal output.
    pub fn short(&self) -> &str {
        &self.0[..10]
    }

    /// Get the full hash as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_checked(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = HashError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str_checked(&s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Incremental hasher.
///
/// Feed it chunks as they arrive and call [`Hasher::finalize`] once the
/// stream is exhausted. Also usable as an `io::Write` sink.
#[derive(Debug, Clone, Default)]
pub struct Hasher {
    inner: Sha256,
    bytes: u64,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes hashed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> ContentHash {
        ContentHash(hex::encode(self.inner.finalize()))
    }
}

impl Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hash everything a reader yields, returning the digest and byte count.
pub fn hash_reader<R: Read + ?Sized>(reader: &mut R) -> io::Result<(ContentHash, u64)> {
    let mut hasher = Hasher::new();
    let bytes = io::copy(reader, &mut hasher)?;
    Ok((hasher.finalize(), bytes))
}
