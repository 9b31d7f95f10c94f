//! Error taxonomy for store operations.

use std::io;

use thiserror::Error;

use crate::hash::{ContentHash, HashError};

/// Errors surfaced by [`crate::BlobStore`] operations.
#[derive(Debug, Error)]
pub enum CasError {
    #[error("blob not found: {0}")]
    NotFound(ContentHash),

    #[error("malformed digest: {0}")]
    MalformedDigest(#[from] HashError),

    #[error("digest mismatch: expected {expected}, content hashed to {actual}")]
    DigestMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("range {start}..{end} not satisfiable for blob of {size} bytes")]
    RangeNotSatisfiable { start: u64, end: u64, size: u64 },

    #[error("CAS is in read-only mode")]
    ReadOnly,

    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

pub type Result<T, E = CasError> = std::result::Result<T, E>;

impl CasError {
    /// True for errors the caller caused, as opposed to storage faults.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, CasError::Io { .. } | CasError::InvalidConfig(_))
    }
}

/// Attach a static description to an `io::Result`, anyhow-style.
pub(crate) trait IoContext<T> {
    fn io_context(self, context: &'static str) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context(self, context: &'static str) -> Result<T> {
        self.map_err(|source| CasError::Io { context, source })
    }
}
