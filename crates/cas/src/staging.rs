//! Staging: private files an upload is written to before it is committed.
//!
//! A staging file has a random name, not a content-based one, because the
//! digest is only known once the stream is exhausted. Bytes are hashed as they
//! are written, so committing never re-reads the data.
//!
//! Layout:
//! ```text
//! {staging_dir}/
//! ├── 3f2a9c0e4b7d4e51a8c6f0d2b9e1a7c4.tmp   # in-flight upload
//! └── ...
//! ```
//!
//! Whatever happens to an upload, its staging file is removed when the
//! [`StagedBlob`] (or the unfinished [`StagingFile`]) is dropped. A committed
//! blob lives on under its object path through a hard link or rename.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::warn;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{IoContext, Result};
use crate::hash::{ContentHash, Hasher};

/// Extension that marks a file as staging data.
pub const STAGING_EXTENSION: &str = "tmp";

/// Read/write chunk size for streaming uploads.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Leading bytes kept for content type detection.
pub const SNIFF_LEN: usize = 8 * 1024;

/// A staging ID - random, 32 hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StagingId(String);

impl StagingId {
    /// Generate a new random staging ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.0, STAGING_EXTENSION)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StagingId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StagingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Removes the file at `path` when dropped. A file that is already gone
/// (renamed into place, for instance) is not an error.
#[derive(Debug)]
pub(crate) struct RemoveOnDrop {
    path: PathBuf,
}

impl RemoveOnDrop {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove staging file"),
        }
    }
}

/// An open staging file being filled by an upload.
#[derive(Debug)]
pub struct StagingFile {
    id: StagingId,
    writer: BufWriter<File>,
    hasher: Hasher,
    head: Vec<u8>,
    guard: RemoveOnDrop,
}

impl StagingFile {
    /// Create a fresh staging file inside `dir`.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).io_context("failed to create staging directory")?;

        let id = StagingId::new();
        let path = dir.join(id.file_name());
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .io_context("failed to create staging file")?;

        Ok(Self {
            id,
            writer: BufWriter::with_capacity(CHUNK_SIZE, file),
            hasher: Hasher::new(),
            head: Vec::new(),
            guard: RemoveOnDrop::new(path),
        })
    }

    pub fn id(&self) -> &StagingId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        self.guard.path()
    }

    pub fn bytes_written(&self) -> u64 {
        self.hasher.bytes_hashed()
    }

    /// Append a chunk, hashing it on the way through.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        self.writer
            .write_all(data)
            .io_context("failed to write staging file")?;
        self.hasher.update(data);
        if self.head.len() < SNIFF_LEN {
            let take = data.len().min(SNIFF_LEN - self.head.len());
            self.head.extend_from_slice(&data[..take]);
        }
        Ok(())
    }

    /// Drain `reader` into the staging file in [`CHUNK_SIZE`] pieces.
    pub fn fill_from(&mut self, reader: &mut dyn Read) -> Result<u64> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).io_context("failed to read upload stream"),
            };
            self.write_chunk(&buf[..n])?;
        }
        Ok(self.bytes_written())
    }

    /// Flush (and optionally fsync) the data and compute the digest.
    pub fn finish(mut self, fsync: bool) -> Result<StagedBlob> {
        self.writer.flush().io_context("failed to flush staging file")?;
        if fsync {
            self.writer
                .get_ref()
                .sync_all()
                .io_context("failed to sync staging file")?;
        }

        let size = self.hasher.bytes_hashed();
        let hash = self.hasher.finalize();
        let sniffed_mime_type = infer::get(&self.head).map(|kind| kind.mime_type());
        // Close the handle before the caller links or renames the file.
        drop(self.writer);

        Ok(StagedBlob {
            hash,
            size,
            sniffed_mime_type,
            guard: self.guard,
        })
    }
}

/// A fully written, hashed staging file awaiting commit.
#[derive(Debug)]
pub struct StagedBlob {
    hash: ContentHash,
    size: u64,
    sniffed_mime_type: Option<&'static str>,
    guard: RemoveOnDrop,
}

impl StagedBlob {
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// MIME type recognised from the leading magic bytes, if any.
    pub fn sniffed_mime_type(&self) -> Option<&'static str> {
        self.sniffed_mime_type
    }

    pub fn path(&self) -> &Path {
        self.guard.path()
    }
}

/// Remove staging files older than `max_age`, returning how many were removed.
///
/// Only files with the staging extension are touched. A missing directory
/// counts as empty.
pub fn purge_stale(dir: &Path, max_age: Duration) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).io_context("failed to read staging directory"),
    };

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries {
        let entry = entry.io_context("failed to read staging directory entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(STAGING_EXTENSION) {
            continue;
        }

        let Ok(meta) = entry.metadata() else { continue };
        if remove_if_stale(&path, &meta, now, max_age) {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Remove hidden `.*.tmp` files older than `max_age` anywhere below `root`.
///
/// These are left in shard directories by a cross-device commit or a sidecar
/// write that was interrupted. Committed objects never start with a dot.
pub fn purge_stale_shards(root: &Path, max_age: Duration) -> Result<usize> {
    if !root.is_dir() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "failed to walk shard directory");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_shard_temp(entry.file_name()) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if remove_if_stale(entry.path(), &meta, now, max_age) {
            removed += 1;
        }
    }
    Ok(removed)
}

fn is_shard_temp(name: &std::ffi::OsStr) -> bool {
    name.to_str()
        .map(|n| n.starts_with('.') && n.ends_with(".tmp"))
        .unwrap_or(false)
}

fn remove_if_stale(path: &Path, meta: &fs::Metadata, now: SystemTime, max_age: Duration) -> bool {
    if !meta.is_file() {
        return false;
    }
    let age = meta
        .modified()
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .unwrap_or_default();
    if age < max_age {
        return false;
    }

    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to purge stale temp file");
            false
        }
    }
}
