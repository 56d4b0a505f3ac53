//! Patch records: one immutable tagged snapshot

use bv_core::ContentId;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Summary counters accumulated during a snapshot run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PatchStats {
    /// Files recorded in the manifest
    pub files: u64,
    /// Objects newly persisted by this run
    pub new_objects: u64,
    /// Bytes newly persisted by this run
    pub new_bytes: u64,
    /// Total content size across the manifest
    pub total_bytes: u64,
}

/// A patch: a tag bound forever to one manifest.
///
/// Records are append-only; once written under a tag they are never
/// modified or replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchRecord {
    /// Time-ordered unique id
    pub id: Ulid,
    /// Human-assigned tag name
    pub tag: String,
    /// Content id of the serialized manifest
    pub manifest: ContentId,
    /// Creation time (Unix milliseconds)
    pub created_ms: u64,
    pub stats: PatchStats,
}

impl PatchRecord {
    pub fn new(tag: &str, manifest: ContentId, stats: PatchStats) -> Self {
        Self {
            id: Ulid::new(),
            tag: tag.to_string(),
            manifest,
            created_ms: current_timestamp_ms(),
            stats,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Whether a string is acceptable as a tag name.
///
/// Tags become file names in the registry, so the alphabet is restricted
/// to `[A-Za-z0-9._-]` and a leading `.` is rejected.
pub fn valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && !tag.starts_with('.')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_millis() as u64
}
