//! Content Addressable Storage (CAS) for rstr.
//!
//! Blobs are identified by the SHA-256 of their bytes and stored on a local
//! filesystem under sharded directories. Identical uploads are stored once.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cas::{BlobStore, CasConfig, FileStore, PutOptions};
//! use std::io::Read;
//!
//! let store = FileStore::open_indexed(CasConfig::with_base_path("/srv/rstr")).unwrap();
//!
//! // Store content
//! let outcome = store
//!     .put(&mut &b"Hello, World!"[..], PutOptions::default().with_mime_type("text/plain"))
//!     .unwrap();
//! println!("Stored as: {} (new: {})", outcome.hash, outcome.created);
//!
//! // Retrieve content
//! let mut data = Vec::new();
//! store.get(&outcome.hash).unwrap().read_to_end(&mut data).unwrap();
//!
//! // Get filesystem path (for external tools)
//! if let Some(path) = store.path(&outcome.hash) {
//!     println!("File at: {}", path.display());
//! }
//! ```
//!
//! # Shared storage
//!
//! Content is write-once, so several processes may share a store directory.
//! Commits are published with `link(2)`; no locks are taken.

pub mod config;
pub mod error;
pub mod hash;
pub mod index;
pub mod metadata;
pub mod staging;
pub mod store;

// Re-exports for convenience
pub use config::CasConfig;
pub use error::{CasError, Result};
pub use hash::{hash_reader, ContentHash, HashError, Hasher};
pub use index::BlobIndex;
pub use metadata::{BlobMetadata, BlobReference, DEFAULT_MIME_TYPE};
pub use store::{AddReport, BlobReader, BlobStore, FileStore, PutOptions, PutOutcome};
