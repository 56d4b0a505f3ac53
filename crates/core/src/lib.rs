//! BinVault Core - Content-addressed storage primitives
//!
//! This crate provides the foundational storage layer:
//! - BLAKE3 content identifiers
//! - Deduplicated object storage with atomic publish
//! - Manifest representation (one snapshot's path listing)
//! - On-disk repository layout

pub mod hash;
pub mod manifest;
pub mod object;
pub mod store;

// Re-export main types for convenience
pub use hash::{hash_bytes, hash_file, ContentId, IncrementalHasher};
pub use manifest::{
    DuplicatePolicy, EntryKind, Manifest, ManifestBuilder, ManifestEntry, ManifestError,
};
pub use object::{ObjectStore, StoreError};
pub use store::{Repo, RepoError};
