//! Metadata types for stored blobs.
//!
//! Each blob can have a JSON sidecar in the metadata directory, sharded the same
//! way as the object itself. The sidecar lets `inspect()` answer MIME type and
//! original filename without touching the blob bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::hash::ContentHash;

/// MIME type reported when nothing better is known.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Sidecar contents, written once by the upload that created the blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobMetadata {
    /// MIME type supplied at upload time.
    pub mime_type: String,

    /// Size of the content in bytes.
    pub size: u64,

    /// Original filename, if the uploader supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// When the blob was first committed.
    pub created: DateTime<Utc>,
}

/// Everything known about a stored blob without reading its content.
///
/// Returned from `inspect()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobReference {
    pub hash: ContentHash,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub created: DateTime<Utc>,

    /// Local filesystem path to the object. Never sent over the wire.
    #[serde(skip)]
    pub local_path: Option<PathBuf>,
}

impl BlobReference {
    pub fn new(hash: ContentHash, metadata: BlobMetadata) -> Self {
        Self {
            hash,
            mime_type: metadata.mime_type,
            size_bytes: metadata.size,
            filename: metadata.filename,
            created: metadata.created,
            local_path: None,
        }
    }

    /// Add a local path to this reference.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }
}

/// Reduce an uploader-supplied name to a bare file name.
///
/// Directory components and empty or dot-only names are discarded, so a
/// sidecar never records a path.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    if name.chars().any(char::is_control) {
        return None;
    }
    Some(name.to_string())
}
