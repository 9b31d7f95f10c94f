//! FileStore: filesystem-backed content addressable storage.
//!
//! Layout (shard depth 3):
//! ```text
//! {base_path}/
//! ├── objects/
//! │   └── b9/4d/27/b9934d3e08...     # blob bytes, named by the digest suffix
//! ├── metadata/
//! │   └── b9/4d/27/b9934d3e08....json # {mime_type, size, filename, created}
//! └── staging/
//!     └── 3f2a9c....tmp               # uploads in flight
//! ```
//!
//! Commit protocol: an upload is written and hashed into a staging file, then
//! hard-linked into its object path. `link(2)` refuses to replace an existing
//! name, so when two uploads of the same bytes race exactly one link succeeds
//! and the other sees `AlreadyExists`. Either way the staging name is unlinked
//! afterwards. Readers only ever see complete files.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::CasConfig;
use crate::error::{CasError, IoContext, Result};
use crate::hash::{hash_reader, ContentHash};
use crate::index::BlobIndex;
use crate::metadata::{sanitize_filename, BlobMetadata, BlobReference, DEFAULT_MIME_TYPE};
use crate::staging::{self, RemoveOnDrop, StagedBlob, StagingFile, StagingId};

/// Trait for blob storage backends.
pub trait BlobStore: Send + Sync {
    /// Stream `reader` into the store and return its digest.
    ///
    /// Storing bytes that are already present is a no-op that reports
    /// `created: false`.
    fn put(&self, reader: &mut dyn Read, options: PutOptions) -> Result<PutOutcome>;

    /// Open a reader over the full blob.
    fn get(&self, hash: &ContentHash) -> Result<BlobReader>;

    /// Open a reader over `range` of the blob.
    fn get_range(&self, hash: &ContentHash, range: Range<u64>) -> Result<BlobReader>;

    /// Check if content exists without opening it.
    fn exists(&self, hash: &ContentHash) -> bool;

    /// Remove a blob and its metadata.
    fn delete(&self, hash: &ContentHash) -> Result<()>;

    /// Get full metadata about stored content.
    fn inspect(&self, hash: &ContentHash) -> Result<BlobReference>;

    /// Get the filesystem path for content (if present).
    fn path(&self, hash: &ContentHash) -> Option<PathBuf>;
}

/// Hints recorded alongside an upload.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    /// Digest the caller claims the content has. Checked before commit.
    pub expected: Option<ContentHash>,
}

impl PutOptions {
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = sanitize_filename(filename);
        self
    }

    pub fn expecting(mut self, hash: ContentHash) -> Self {
        self.expected = Some(hash);
        self
    }
}

/// Result of a successful `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub hash: ContentHash,
    pub size_bytes: u64,
    /// False when the content was already stored (dedup hit).
    pub created: bool,
}

/// How a staged file was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommitOutcome {
    Created,
    /// Another writer got there first; our copy is discarded.
    AlreadyPresent,
}

/// Reader over (part of) a stored blob.
///
/// Holds an open handle, so a concurrent delete cannot cut a read short.
#[derive(Debug)]
pub struct BlobReader {
    inner: io::Take<File>,
    size: u64,
    range: Range<u64>,
}

impl BlobReader {
    /// Full size of the blob, regardless of the range being read.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of bytes this reader yields in total.
    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn range(&self) -> Range<u64> {
        self.range.clone()
    }

    /// Split into the file handle, positioned at the next unread byte, and
    /// the byte range still to be read.
    pub fn into_parts(self) -> (File, Range<u64>) {
        let remaining = self.inner.limit();
        let end = self.range.end;
        (self.inner.into_inner(), end - remaining..end)
    }

    /// Narrow this reader to `range` of the blob, reusing the open handle.
    ///
    /// Works on the handle alone, so the slice reads the same file the
    /// reader was opened on even if the blob has since been deleted.
    pub fn slice(self, range: Range<u64>) -> Result<Self> {
        let size = self.size;
        if range.start > range.end || range.end > size {
            return Err(CasError::RangeNotSatisfiable {
                start: range.start,
                end: range.end,
                size,
            });
        }
        let mut file = self.inner.into_inner();
        file.seek(SeekFrom::Start(range.start))
            .io_context("failed to seek blob")?;
        Ok(Self {
            inner: file.take(range.end - range.start),
            size,
            range,
        })
    }
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Outcome of importing a batch of files.
#[derive(Debug, Default)]
pub struct AddReport {
    pub added: Vec<(PathBuf, PutOutcome)>,
    pub failed: Vec<(PathBuf, CasError)>,
}

/// Filesystem-based blob store.
#[derive(Debug, Clone)]
pub struct FileStore {
    config: CasConfig,
    index: Arc<BlobIndex>,
}

impl FileStore {
    /// Create a new FileStore with the given configuration.
    ///
    /// Creates the objects, staging and metadata directories unless the
    /// store is read-only. The index starts empty; see [`FileStore::open_indexed`].
    pub fn new(config: CasConfig) -> Result<Self> {
        config.validate()?;

        if !config.read_only {
            fs::create_dir_all(config.objects_dir())
                .io_context("failed to create objects directory")?;
            fs::create_dir_all(config.staging_dir())
                .io_context("failed to create staging directory")?;
            if config.store_metadata {
                fs::create_dir_all(config.metadata_dir())
                    .io_context("failed to create metadata directory")?;
            }
        }

        Ok(Self {
            config,
            index: Arc::new(BlobIndex::new()),
        })
    }

    /// Create a store and fill its index from a scan of the objects tree.
    pub fn open_indexed(config: CasConfig) -> Result<Self> {
        let store = Self::new(config)?;
        let count = store.rebuild_index()?;
        info!(
            base_path = %store.config.base_path.display(),
            blobs = count,
            "blob index rebuilt"
        );
        Ok(store)
    }

    /// Create a FileStore at a specific path.
    pub fn at_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(CasConfig::with_base_path(path))
    }

    /// Create a read-only FileStore at a specific path.
    pub fn read_only_at(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(CasConfig::read_only(path))
    }

    pub fn config(&self) -> &CasConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<BlobIndex> {
        &self.index
    }

    fn object_path(&self, hash: &ContentHash) -> PathBuf {
        self.config
            .objects_dir()
            .join(hash.relative_path(self.config.shard_depth))
    }

    fn metadata_path(&self, hash: &ContentHash) -> PathBuf {
        let mut path = self
            .config
            .metadata_dir()
            .join(hash.relative_path(self.config.shard_depth));
        path.set_extension("json");
        path
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.config.read_only {
            return Err(CasError::ReadOnly);
        }
        Ok(())
    }

    /// Publish a staged blob under its object path.
    fn commit(&self, staged: &StagedBlob) -> Result<CommitOutcome> {
        let dest = self.object_path(staged.hash());
        let shard_dir = parent_dir(&dest)?;
        fs::create_dir_all(shard_dir).io_context("failed to create object shard directory")?;

        let outcome = match link_no_clobber(staged.path(), &dest) {
            Ok(outcome) => outcome,
            Err(e) if is_cross_device(&e) => self.commit_across_devices(staged.path(), &dest)?,
            Err(e) => return Err(e).io_context("failed to commit blob"),
        };

        if outcome == CommitOutcome::Created && self.config.fsync {
            sync_dir(shard_dir);
        }
        Ok(outcome)
    }

    /// Staging lives on another filesystem: copy next to the destination
    /// first so the final publish is still a single link.
    fn commit_across_devices(&self, source: &Path, dest: &Path) -> Result<CommitOutcome> {
        let shard_dir = parent_dir(dest)?;
        let temp = RemoveOnDrop::new(shard_dir.join(format!(".{}", StagingId::new().file_name())));

        fs::copy(source, temp.path()).io_context("failed to copy staged blob")?;
        if self.config.fsync {
            File::open(temp.path())
                .and_then(|file| file.sync_all())
                .io_context("failed to sync copied blob")?;
        }
        link_no_clobber(temp.path(), dest).io_context("failed to commit blob")
    }

    /// Write the sidecar once; an existing sidecar is never replaced.
    fn write_metadata(&self, hash: &ContentHash, metadata: &BlobMetadata) -> Result<()> {
        let dest = self.metadata_path(hash);
        let shard_dir = parent_dir(&dest)?;
        fs::create_dir_all(shard_dir).io_context("failed to create metadata shard directory")?;

        let temp = RemoveOnDrop::new(shard_dir.join(format!(".{}", StagingId::new().file_name())));
        let json = serde_json::to_vec_pretty(metadata)
            .map_err(io::Error::from)
            .io_context("failed to serialize metadata")?;
        fs::write(temp.path(), json).io_context("failed to write metadata file")?;
        link_no_clobber(temp.path(), &dest).io_context("failed to publish metadata file")?;
        Ok(())
    }

    fn read_metadata(&self, hash: &ContentHash) -> Option<BlobMetadata> {
        let path = self.metadata_path(hash);
        let json = match fs::read(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(hash = %hash.short(), error = %e, "failed to read metadata file");
                return None;
            }
        };
        match serde_json::from_slice(&json) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!(hash = %hash.short(), error = %e, "ignoring unparseable metadata file");
                None
            }
        }
    }

    fn open_object(&self, hash: &ContentHash) -> Result<(File, u64)> {
        let file = match File::open(self.object_path(hash)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.forget(hash);
                return Err(CasError::NotFound(hash.clone()));
            }
            Err(e) => return Err(e).io_context("failed to open blob"),
        };
        let size = file.metadata().io_context("failed to stat blob")?.len();
        Ok((file, size))
    }

    /// Drop `hash` from the index unless a concurrent put has already
    /// brought the object back.
    fn forget(&self, hash: &ContentHash) {
        self.index.remove(hash);
        if self.object_path(hash).is_file() {
            self.index.insert(hash.clone());
        }
    }

    /// Import one file from the local filesystem.
    pub fn add_file(&self, path: &Path) -> Result<PutOutcome> {
        let mut file = File::open(path).io_context("failed to open input file")?;
        let mut options = PutOptions::default();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            options = options.with_filename(name);
        }
        self.put(&mut file, options)
    }

    /// Import files, descending into directories, using `threads` workers.
    ///
    /// Results keep the order in which the files were found.
    pub fn add_files(&self, paths: &[PathBuf], threads: usize) -> AddReport {
        let mut report = AddReport::default();
        let mut files = Vec::new();
        for root in paths {
            for entry in WalkDir::new(root).sort_by_file_name() {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                    Ok(_) => {}
                    Err(e) => {
                        let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                        let source = io::Error::from(e);
                        report
                            .failed
                            .push((path, CasError::Io { context: "failed to walk input path", source }));
                    }
                }
            }
        }

        let workers = threads.clamp(1, files.len().max(1));
        let next = AtomicUsize::new(0);
        let mut results: Vec<(usize, Result<PutOutcome>)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut done = Vec::new();
                        loop {
                            let i = next.fetch_add(1, Ordering::Relaxed);
                            let Some(path) = files.get(i) else { break };
                            done.push((i, self.add_file(path)));
                        }
                        done
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(done) => done,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });
        results.sort_by_key(|(i, _)| *i);

        for (i, result) in results {
            let path = files[i].clone();
            match result {
                Ok(outcome) => report.added.push((path, outcome)),
                Err(e) => report.failed.push((path, e)),
            }
        }
        report
    }

    /// Enumerate committed digests by walking the objects tree.
    ///
    /// Anything that does not sit at a valid shard path is skipped.
    pub fn scan(&self) -> Result<Vec<ContentHash>> {
        let objects = self.config.objects_dir();
        if !objects.exists() {
            return Ok(Vec::new());
        }

        let depth = self.config.shard_depth;
        let mut hashes = Vec::new();
        for entry in WalkDir::new(&objects).min_depth(depth + 1).max_depth(depth + 1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry during scan");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&objects) else {
                continue;
            };
            let joined: String = relative
                .components()
                .filter_map(|c| c.as_os_str().to_str())
                .collect();
            match joined.parse::<ContentHash>() {
                Ok(hash) if hash.relative_path(depth) == relative => hashes.push(hash),
                _ => debug!(path = %entry.path().display(), "skipping stray file in objects tree"),
            }
        }
        Ok(hashes)
    }

    /// Replace the index contents with a fresh scan; returns the blob count.
    pub fn rebuild_index(&self) -> Result<usize> {
        let hashes = self.scan()?;
        let count = hashes.len();
        self.index.replace_all(hashes);
        Ok(count)
    }

    /// Re-hash the stored bytes and compare against the digest.
    pub fn verify(&self, hash: &ContentHash) -> Result<bool> {
        let mut reader = self.get(hash)?;
        let (actual, _) = hash_reader(&mut reader).io_context("failed to read blob")?;
        if &actual != hash {
            warn!(expected = %hash, actual = %actual, "blob content does not match its digest");
        }
        Ok(&actual == hash)
    }

    /// Remove staging files, and temp files in the shard directories, left
    /// behind by a crash.
    pub fn purge_stale_staging(&self, max_age: Duration) -> Result<usize> {
        if self.config.read_only {
            return Ok(0);
        }
        let staged = staging::purge_stale(&self.config.staging_dir(), max_age)?;
        let sharded = staging::purge_stale_shards(&self.config.objects_dir(), max_age)?
            + staging::purge_stale_shards(&self.config.metadata_dir(), max_age)?;
        let removed = staged + sharded;
        if removed > 0 {
            info!(staged, sharded, "purged stale temp files");
        }
        Ok(removed)
    }

    /// Sorted digests known to the index, at most `limit`.
    pub fn list(&self, limit: usize) -> Vec<ContentHash> {
        self.index.sorted(limit)
    }
}

impl BlobStore for FileStore {
    fn put(&self, reader: &mut dyn Read, options: PutOptions) -> Result<PutOutcome> {
        self.ensure_writable()?;

        let mut staging = StagingFile::create(&self.config.staging_dir())?;
        staging.fill_from(reader)?;
        let staged = staging.finish(self.config.fsync)?;

        if let Some(expected) = options.expected {
            if &expected != staged.hash() {
                return Err(CasError::DigestMismatch {
                    expected,
                    actual: staged.hash().clone(),
                });
            }
        }

        let outcome = self.commit(&staged)?;
        let hash = staged.hash().clone();
        let size_bytes = staged.size();
        let sniffed = staged.sniffed_mime_type();
        drop(staged);

        let created = outcome == CommitOutcome::Created;
        if created {
            debug!(hash = %hash.short(), size_bytes, "committed blob");
        } else {
            debug!(hash = %hash.short(), "dedup hit, discarded staged copy");
        }

        if self.config.store_metadata && (created || !self.metadata_path(&hash).exists()) {
            let metadata = BlobMetadata {
                mime_type: options
                    .mime_type
                    .or_else(|| sniffed.map(str::to_string))
                    .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
                size: size_bytes,
                filename: options.filename,
                created: Utc::now(),
            };
            // The blob is already durable; a missing sidecar only degrades inspect().
            if let Err(e) = self.write_metadata(&hash, &metadata) {
                warn!(hash = %hash.short(), error = %e, "failed to write metadata");
            }
        }

        self.index.insert(hash.clone());
        Ok(PutOutcome {
            hash,
            size_bytes,
            created,
        })
    }

    fn get(&self, hash: &ContentHash) -> Result<BlobReader> {
        let (file, size) = self.open_object(hash)?;
        Ok(BlobReader {
            inner: file.take(size),
            size,
            range: 0..size,
        })
    }

    fn get_range(&self, hash: &ContentHash, range: Range<u64>) -> Result<BlobReader> {
        self.get(hash)?.slice(range)
    }

    fn exists(&self, hash: &ContentHash) -> bool {
        if self.index.contains(hash) {
            return true;
        }
        if self.object_path(hash).is_file() {
            self.index.insert(hash.clone());
            return true;
        }
        false
    }

    fn delete(&self, hash: &ContentHash) -> Result<()> {
        self.ensure_writable()?;

        // Sidecar first: a put racing this delete either lands after the
        // object is gone, or rewrites the sidecar it finds missing.
        match fs::remove_file(self.metadata_path(hash)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(hash = %hash.short(), error = %e, "failed to delete metadata file"),
        }

        let removed = fs::remove_file(self.object_path(hash));
        self.forget(hash);
        match removed {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CasError::NotFound(hash.clone()));
            }
            Err(e) => return Err(e).io_context("failed to delete blob"),
        }

        debug!(hash = %hash.short(), "deleted blob");
        Ok(())
    }

    fn inspect(&self, hash: &ContentHash) -> Result<BlobReference> {
        let obj_path = self.object_path(hash);
        let stat = match fs::metadata(&obj_path) {
            Ok(stat) => stat,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CasError::NotFound(hash.clone()))
            }
            Err(e) => return Err(e).io_context("failed to stat blob"),
        };

        let metadata = self.read_metadata(hash).unwrap_or_else(|| BlobMetadata {
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            size: stat.len(),
            filename: None,
            created: stat
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
        });

        Ok(BlobReference::new(hash.clone(), metadata).with_path(obj_path))
    }

    fn path(&self, hash: &ContentHash) -> Option<PathBuf> {
        let path = self.object_path(hash);
        path.is_file().then_some(path)
    }
}

fn parent_dir(path: &Path) -> Result<&Path> {
    path.parent().ok_or_else(|| CasError::Io {
        context: "object path has no parent directory",
        source: io::Error::from(io::ErrorKind::InvalidInput),
    })
}

/// Link `source` to `dest` without ever replacing `dest`.
///
/// Where hard links are unsupported this degrades to `rename`, which may
/// replace a concurrently created `dest`; both hold the same bytes.
fn link_no_clobber(source: &Path, dest: &Path) -> io::Result<CommitOutcome> {
    match fs::hard_link(source, dest) {
        Ok(()) => Ok(CommitOutcome::Created),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(CommitOutcome::AlreadyPresent),
        Err(e) if link_unsupported(&e) => {
            if dest.exists() {
                return Ok(CommitOutcome::AlreadyPresent);
            }
            fs::rename(source, dest)?;
            Ok(CommitOutcome::Created)
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_e: &io::Error) -> bool {
    false
}

#[cfg(unix)]
fn link_unsupported(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::Unsupported
        || matches!(
            e.raw_os_error(),
            Some(libc::EPERM) | Some(libc::EOPNOTSUPP) | Some(libc::ENOSYS)
        )
}

#[cfg(not(unix))]
fn link_unsupported(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::Unsupported
}

/// Persist directory entries (best effort).
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        warn!(dir = %dir.display(), error = %e, "failed to sync directory");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::io::Cursor;
    use tempfile::TempDir;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn put_bytes(store: &FileStore, data: &[u8]) -> crate::Result<PutOutcome> {
        store.put(&mut Cursor::new(data.to_vec()), PutOptions::default())
    }

    fn read_all(mut reader: BlobReader) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn staging_entries(store: &FileStore) -> Result<usize> {
        Ok(fs::read_dir(store.config().staging_dir())?.count())
    }

    #[test]
    fn test_put_and_get() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        let outcome = put_bytes(&store, b"hello world")?;
        assert_eq!(outcome.hash.as_str(), HELLO_WORLD);
        assert_eq!(outcome.size_bytes, 11);
        assert!(outcome.created);

        let reader = store.get(&outcome.hash)?;
        assert_eq!(reader.size(), 11);
        assert_eq!(read_all(reader)?, b"hello world");
        assert_eq!(staging_entries(&store)?, 0);
        Ok(())
    }

    #[test]
    fn test_object_layout() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        let outcome = put_bytes(&store, b"hello world")?;
        let expected = temp_dir
            .path()
            .join("objects/b9/4d/27")
            .join(&HELLO_WORLD[6..]);
        assert_eq!(store.path(&outcome.hash), Some(expected.clone()));
        assert!(expected.is_file());
        assert!(temp_dir
            .path()
            .join("metadata/b9/4d/27")
            .join(format!("{}.json", &HELLO_WORLD[6..]))
            .is_file());
        Ok(())
    }

    #[test]
    fn test_deduplication() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        let first = put_bytes(&store, b"Duplicate Me")?;
        let second = put_bytes(&store, b"Duplicate Me")?;

        assert_eq!(first.hash, second.hash);
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(store.scan()?.len(), 1);
        assert_eq!(staging_entries(&store)?, 0);
        Ok(())
    }

    #[test]
    fn test_empty_blob() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        let outcome = put_bytes(&store, b"")?;
        assert_eq!(outcome.size_bytes, 0);
        let reader = store.get(&outcome.hash)?;
        assert!(reader.is_empty());
        assert!(read_all(reader)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_unknown_digest() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;
        let missing = ContentHash::from_data(b"never stored");

        assert!(!store.exists(&missing));
        assert!(matches!(store.get(&missing), Err(CasError::NotFound(_))));
        assert!(matches!(store.inspect(&missing), Err(CasError::NotFound(_))));
        assert!(store.path(&missing).is_none());
        Ok(())
    }

    #[test]
    fn test_delete() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        let hash = put_bytes(&store, b"delete me")?.hash;
        assert!(store.exists(&hash));

        store.delete(&hash)?;
        assert!(!store.exists(&hash));
        assert!(!store.index().contains(&hash));
        assert!(matches!(store.get(&hash), Err(CasError::NotFound(_))));
        assert!(matches!(store.delete(&hash), Err(CasError::NotFound(_))));
        assert!(!store.metadata_path(&hash).exists());
        Ok(())
    }

    #[test]
    fn test_read_survives_delete() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;
        let data = vec![7u8; 200_000];

        let hash = put_bytes(&store, &data)?.hash;
        let reader = store.get(&hash)?;
        store.delete(&hash)?;

        assert_eq!(read_all(reader)?, data);
        Ok(())
    }

    #[test]
    fn test_exists_heals_index() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let hash = put_bytes(&FileStore::at_path(temp_dir.path())?, b"healing")?.hash;

        // A fresh store has not scanned yet.
        let store = FileStore::at_path(temp_dir.path())?;
        assert!(!store.index().contains(&hash));
        assert!(store.exists(&hash));
        assert!(store.index().contains(&hash));
        Ok(())
    }

    #[test]
    fn test_get_drops_stale_index_entry() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        let hash = put_bytes(&store, b"removed behind our back")?.hash;
        fs::remove_file(store.object_path(&hash))?;

        assert!(store.index().contains(&hash));
        assert!(matches!(store.get(&hash), Err(CasError::NotFound(_))));
        assert!(!store.index().contains(&hash));
        Ok(())
    }

    #[test]
    fn test_inspect_with_metadata() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        let options = PutOptions::default()
            .with_mime_type("application/json")
            .with_filename("../config/data.json");
        let outcome = store.put(&mut Cursor::new(b"{}".to_vec()), options)?;

        let reference = store.inspect(&outcome.hash)?;
        assert_eq!(reference.hash, outcome.hash);
        assert_eq!(reference.mime_type, "application/json");
        assert_eq!(reference.size_bytes, 2);
        assert_eq!(reference.filename.as_deref(), Some("data.json"));
        assert!(reference.local_path.is_some());
        Ok(())
    }

    #[test]
    fn test_dedup_keeps_first_metadata() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        let first = PutOptions::default().with_mime_type("text/plain").with_filename("a.txt");
        let second = PutOptions::default().with_mime_type("text/html").with_filename("b.html");
        let hash = store.put(&mut Cursor::new(b"same".to_vec()), first)?.hash;
        store.put(&mut Cursor::new(b"same".to_vec()), second)?;

        let reference = store.inspect(&hash)?;
        assert_eq!(reference.mime_type, "text/plain");
        assert_eq!(reference.filename.as_deref(), Some("a.txt"));
        Ok(())
    }

    #[test]
    fn test_inspect_without_metadata() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config = CasConfig {
            store_metadata: false,
            ..CasConfig::with_base_path(temp_dir.path())
        };
        let store = FileStore::new(config)?;

        let hash = put_bytes(&store, b"no metadata")?.hash;
        let reference = store.inspect(&hash)?;
        assert_eq!(reference.mime_type, DEFAULT_MIME_TYPE);
        assert_eq!(reference.size_bytes, 11);
        assert!(reference.filename.is_none());
        assert!(!temp_dir.path().join("metadata").exists());
        Ok(())
    }

    #[test]
    fn test_digest_mismatch_commits_nothing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;
        let wrong = ContentHash::from_data(b"something else");

        let result = store.put(
            &mut Cursor::new(b"actual".to_vec()),
            PutOptions::default().expecting(wrong.clone()),
        );
        match result {
            Err(CasError::DigestMismatch { expected, actual }) => {
                assert_eq!(expected, wrong);
                assert_eq!(actual, ContentHash::from_data(b"actual"));
            }
            other => panic!("expected DigestMismatch, got {:?}", other),
        }
        assert!(store.scan()?.is_empty());
        assert!(store.index().is_empty());
        assert_eq!(staging_entries(&store)?, 0);

        let right = ContentHash::from_data(b"actual");
        let outcome = store.put(
            &mut Cursor::new(b"actual".to_vec()),
            PutOptions::default().expecting(right.clone()),
        )?;
        assert_eq!(outcome.hash, right);
        Ok(())
    }

    #[test]
    fn test_failed_stream_leaves_no_trace() -> Result<()> {
        struct Truncated(usize);
        impl Read for Truncated {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.0 == 0 {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "client disconnected"));
                }
                let n = buf.len().min(self.0);
                buf[..n].fill(b'x');
                self.0 -= n;
                Ok(n)
            }
        }

        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        let result = store.put(&mut Truncated(100_000), PutOptions::default());
        assert!(matches!(result, Err(CasError::Io { .. })));
        assert_eq!(staging_entries(&store)?, 0);
        assert!(store.scan()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_get_range() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;
        let hash = put_bytes(&store, b"0123456789")?.hash;

        let reader = store.get_range(&hash, 2..6)?;
        assert_eq!(reader.size(), 10);
        assert_eq!(reader.len(), 4);
        assert_eq!(reader.range(), 2..6);
        assert_eq!(read_all(reader)?, b"2345");

        let tail = store.get_range(&hash, 7..10)?;
        assert_eq!(read_all(tail)?, b"789");

        let err = store.get_range(&hash, 5..11).unwrap_err();
        assert!(matches!(
            err,
            CasError::RangeNotSatisfiable { start: 5, end: 11, size: 10 }
        ));
        Ok(())
    }

    #[test]
    fn test_slice_reuses_open_handle() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;
        let hash = put_bytes(&store, b"0123456789")?.hash;

        let reader = store.get(&hash)?;
        store.delete(&hash)?;
        let slice = reader.slice(4..8)?;
        assert_eq!(slice.range(), 4..8);
        assert_eq!(slice.size(), 10);
        assert_eq!(read_all(slice)?, b"4567");

        let hash = put_bytes(&store, b"0123456789")?.hash;
        let err = store.get(&hash)?.slice(8..12).unwrap_err();
        assert!(matches!(
            err,
            CasError::RangeNotSatisfiable { start: 8, end: 12, size: 10 }
        ));
        Ok(())
    }

    #[test]
    fn test_into_parts_positions_handle() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;
        let hash = put_bytes(&store, b"abcdefgh")?.hash;

        let (mut file, range) = store.get_range(&hash, 3..5)?.into_parts();
        assert_eq!(range, 3..5);
        let mut buf = [0u8; 2];
        file.read_exact(&mut buf)?;
        assert_eq!(&buf, b"de");
        Ok(())
    }

    #[test]
    fn test_read_only_prevents_writes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let writable = FileStore::at_path(temp_dir.path())?;
        let hash = put_bytes(&writable, b"readable content")?.hash;

        let readonly = FileStore::read_only_at(temp_dir.path())?;
        assert!(matches!(put_bytes(&readonly, b"nope"), Err(CasError::ReadOnly)));
        assert!(matches!(readonly.delete(&hash), Err(CasError::ReadOnly)));
        assert_eq!(read_all(readonly.get(&hash)?)?, b"readable content");
        Ok(())
    }

    #[test]
    fn test_read_only_creates_nothing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path().join("absent");
        let store = FileStore::read_only_at(&base)?;

        assert!(!base.exists());
        assert!(store.scan()?.is_empty());
        assert_eq!(store.purge_stale_staging(Duration::ZERO)?, 0);
        Ok(())
    }

    #[test]
    fn test_invalid_shard_depth_rejected() {
        let config = CasConfig {
            shard_depth: 0,
            ..CasConfig::with_base_path("/nonexistent")
        };
        assert!(matches!(FileStore::new(config), Err(CasError::InvalidConfig(_))));
    }

    #[test]
    fn test_scan_skips_strays_and_rebuilds_index() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;
        let a = put_bytes(&store, b"alpha")?.hash;
        let b = put_bytes(&store, b"beta")?.hash;

        let objects = store.config().objects_dir();
        fs::write(objects.join("README"), b"not a blob")?;
        fs::create_dir_all(objects.join("zz/zz/zz"))?;
        fs::write(objects.join("zz/zz/zz/nothex"), b"stray")?;
        // Right number of hex chars, wrong shard shape.
        let misplaced = ContentHash::from_data(b"misplaced");
        let odd_shards = objects.join("0/000/00");
        fs::create_dir_all(&odd_shards)?;
        fs::write(odd_shards.join(&misplaced.as_str()[6..]), b"misplaced")?;

        let mut found = store.scan()?;
        found.sort();
        let mut expected = vec![a.clone(), b.clone()];
        expected.sort();
        assert_eq!(found, expected);

        let fresh = FileStore::at_path(temp_dir.path())?;
        assert_eq!(fresh.rebuild_index()?, 2);
        assert_eq!(fresh.list(10), expected);
        assert_eq!(fresh.list(1).len(), 1);
        Ok(())
    }

    #[test]
    fn test_open_indexed() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let hash = put_bytes(&FileStore::at_path(temp_dir.path())?, b"indexed")?.hash;

        let store = FileStore::open_indexed(CasConfig::with_base_path(temp_dir.path()))?;
        assert!(store.index().contains(&hash));
        assert_eq!(store.index().len(), 1);
        Ok(())
    }

    #[test]
    fn test_verify_detects_corruption() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;
        let hash = put_bytes(&store, b"pristine")?.hash;
        assert!(store.verify(&hash)?);

        fs::write(store.object_path(&hash), b"tampered")?;
        assert!(!store.verify(&hash)?);
        Ok(())
    }

    #[test]
    fn test_shallow_shard_depth() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config = CasConfig {
            shard_depth: 1,
            ..CasConfig::with_base_path(temp_dir.path())
        };
        let store = FileStore::new(config)?;

        let hash = put_bytes(&store, b"hello world")?.hash;
        let expected = temp_dir.path().join("objects/b9").join(&HELLO_WORLD[2..]);
        assert_eq!(store.path(&hash), Some(expected));
        assert_eq!(store.scan()?, vec![hash]);
        Ok(())
    }

    #[test]
    fn test_external_staging_dir() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let staging_dir = TempDir::new()?;
        let config = CasConfig {
            staging_dir: Some(staging_dir.path().to_path_buf()),
            ..CasConfig::with_base_path(temp_dir.path())
        };
        let store = FileStore::new(config)?;

        let hash = put_bytes(&store, b"staged elsewhere")?.hash;
        assert_eq!(read_all(store.get(&hash)?)?, b"staged elsewhere");
        assert_eq!(fs::read_dir(staging_dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_purge_stale_staging() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;
        let leftover = store.config().staging_dir().join("crashed.tmp");
        fs::write(&leftover, b"half an upload")?;

        assert_eq!(store.purge_stale_staging(Duration::from_secs(3600))?, 0);
        assert_eq!(store.purge_stale_staging(Duration::ZERO)?, 1);
        assert!(!leftover.exists());
        Ok(())
    }

    #[test]
    fn test_purge_covers_shard_temp_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;
        let hash = put_bytes(&store, b"hello world")?.hash;

        let object_path = store.object_path(&hash);
        let object_tmp = parent_dir(&object_path)?.join(".0f1e2d3c.tmp");
        fs::write(&object_tmp, b"interrupted copy")?;
        let sidecar_path = store.metadata_path(&hash);
        let sidecar_tmp = parent_dir(&sidecar_path)?.join(".4b5a6978.tmp");
        fs::write(&sidecar_tmp, b"{")?;

        assert_eq!(store.purge_stale_staging(Duration::ZERO)?, 2);
        assert!(!object_tmp.exists());
        assert!(!sidecar_tmp.exists());
        assert!(object_path.exists());
        assert!(sidecar_path.exists());
        assert!(store.verify(&hash)?);
        Ok(())
    }

    #[test]
    fn test_mime_type_sniffed_from_content() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let input = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        // Signature plus the start of an IHDR chunk.
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        let path = input.path().join("picture");
        fs::write(&path, png)?;

        let hash = store.add_file(&path)?.hash;
        let reference = store.inspect(&hash)?;
        assert_eq!(reference.mime_type, "image/png");
        assert_eq!(reference.filename.as_deref(), Some("picture"));

        // Unrecognised bytes fall back to the default.
        let plain = put_bytes(&store, b"no magic here")?.hash;
        assert_eq!(store.inspect(&plain)?.mime_type, DEFAULT_MIME_TYPE);
        Ok(())
    }

    #[test]
    fn test_explicit_mime_type_beats_sniffing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        let outcome = store.put(
            &mut &b"%PDF-1.7\n%fake"[..],
            PutOptions::default().with_mime_type("application/x-custom"),
        )?;
        assert_eq!(store.inspect(&outcome.hash)?.mime_type, "application/x-custom");
        Ok(())
    }

    #[test]
    fn test_add_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let input = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        fs::create_dir_all(input.path().join("nested"))?;
        fs::write(input.path().join("one.txt"), b"one")?;
        fs::write(input.path().join("nested/two.txt"), b"two")?;
        fs::write(input.path().join("nested/dup.txt"), b"one")?;
        let missing = input.path().join("missing.txt");

        let report = store.add_files(&[input.path().to_path_buf(), missing.clone()], 4);
        assert_eq!(report.added.len(), 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, missing);

        let created = report.added.iter().filter(|(_, o)| o.created).count();
        assert_eq!(created, 2);
        assert_eq!(store.list(10).len(), 2);

        let (path, outcome) = report
            .added
            .iter()
            .find(|(p, _)| p.ends_with("two.txt"))
            .expect("two.txt imported");
        assert!(path.starts_with(input.path()));
        assert_eq!(store.inspect(&outcome.hash)?.filename.as_deref(), Some("two.txt"));
        Ok(())
    }
}
