//! In-memory set of digests known to be stored.
//!
//! The index is a cache in front of the filesystem. It short-circuits
//! `exists` and listing, but `get` and `delete` always resolve against the
//! objects directory, and on disagreement the filesystem wins.

use dashmap::DashSet;

use crate::hash::ContentHash;

#[derive(Debug, Default)]
pub struct BlobIndex {
    known: DashSet<ContentHash>,
}

impl BlobIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.known.contains(hash)
    }

    /// Returns true if the digest was not already indexed.
    pub fn insert(&self, hash: ContentHash) -> bool {
        self.known.insert(hash)
    }

    /// Returns true if the digest was indexed.
    pub fn remove(&self, hash: &ContentHash) -> bool {
        self.known.remove(hash).is_some()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Swap the contents for a fresh scan.
    ///
    /// Entries inserted concurrently with the swap may be dropped; the next
    /// `exists` filesystem check heals them.
    pub fn replace_all(&self, hashes: impl IntoIterator<Item = ContentHash>) {
        self.known.clear();
        for hash in hashes {
            self.known.insert(hash);
        }
    }

    /// Indexed digests in ascending order, at most `limit` of them.
    pub fn sorted(&self, limit: usize) -> Vec<ContentHash> {
        let mut hashes: Vec<ContentHash> = self.known.iter().map(|h| h.key().clone()).collect();
        hashes.sort_unstable();
        hashes.truncate(limit);
        hashes
    }
}
