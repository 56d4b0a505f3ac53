//! Manifest representation: the ordered path listing of one snapshot

use crate::hash::{hash_bytes, ContentId};
use ahash::AHashMap;
use smallvec::SmallVec;
use thiserror::Error;

/// Serialized manifest magic (format version 1)
const MAGIC: &[u8] = b"BVM1";

/// Kind of manifest entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file; the object holds the file bytes
    File,
    /// Symbolic link; the object holds the link target bytes
    Symlink,
}

/// One (path, content id) record in a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Repository-relative path, `/`-separated
    pub path: String,
    pub kind: EntryKind,
    /// Unix permission bits
    pub mode: u32,
    /// Content size in bytes
    pub size: u64,
    /// Reference into the object store, never ownership
    pub id: ContentId,
}

impl ManifestEntry {
    pub fn file(path: impl Into<String>, mode: u32, size: u64, id: ContentId) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            mode,
            size,
            id,
        }
    }

    pub fn symlink(path: impl Into<String>, size: u64, id: ContentId) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Symlink,
            mode: 0o120000,
            size,
            id,
        }
    }
}

/// Policy for a path appearing more than once in a single snapshot run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Fail the run, naming the duplicate path
    #[default]
    Reject,
    /// Keep the later entry (last wins)
    Overwrite,
}

/// Manifest errors
#[derive(Debug, Error)]
pub enum ManifestError {
    /// A path was added twice in one run under the reject policy
    #[error("duplicate path in snapshot: {path}")]
    DuplicatePath { path: String },

    /// Serialized manifest bytes failed validation
    #[error("corrupt manifest: {reason}")]
    Corrupt { reason: String },
}

/// An immutable, ordered sequence of manifest entries.
///
/// Entry order is the insertion order from traversal and is preserved by
/// serialization, so a manifest's [`ContentId`] is deterministic for a
/// given run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter()
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Total content size across all entries
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Serialize to the BVM1 binary format.
    ///
    /// Layout: magic, entry count (u32 le), then per entry: path length
    /// (u16 le), path bytes, kind (u8), mode (u32 le), size (u64 le),
    /// content id (32 bytes). Entries are written in insertion order.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());

        for entry in &self.entries {
            let path_bytes = entry.path.as_bytes();
            bytes.extend_from_slice(&(path_bytes.len() as u16).to_le_bytes());
            bytes.extend_from_slice(path_bytes);
            bytes.push(match entry.kind {
                EntryKind::File => 0u8,
                EntryKind::Symlink => 1u8,
            });
            bytes.extend_from_slice(&entry.mode.to_le_bytes());
            bytes.extend_from_slice(&entry.size.to_le_bytes());
            bytes.extend_from_slice(entry.id.as_bytes());
        }

        bytes
    }

    /// Deserialize from BVM1 bytes, validating magic and bounds
    pub fn deserialize(bytes: &[u8]) -> Result<Self, ManifestError> {
        let corrupt = |reason: &str| ManifestError::Corrupt {
            reason: reason.to_string(),
        };

        if bytes.len() < 8 {
            return Err(corrupt("shorter than header"));
        }
        if &bytes[0..4] != MAGIC {
            return Err(corrupt("bad magic"));
        }

        let entry_count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let mut entries = Vec::with_capacity(entry_count.min(1 << 16));
        let mut offset = 8;

        for _ in 0..entry_count {
            if offset + 2 > bytes.len() {
                return Err(corrupt("truncated path length"));
            }
            let path_len = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as usize;
            offset += 2;

            if offset + path_len > bytes.len() {
                return Err(corrupt("truncated path"));
            }
            let path = std::str::from_utf8(&bytes[offset..offset + path_len])
                .map_err(|_| corrupt("path is not UTF-8"))?
                .to_string();
            offset += path_len;

            if offset + 1 + 4 + 8 + 32 > bytes.len() {
                return Err(corrupt("truncated entry"));
            }

            let kind = match bytes[offset] {
                0 => EntryKind::File,
                1 => EntryKind::Symlink,
                other => {
                    return Err(ManifestError::Corrupt {
                        reason: format!("unknown entry kind {other}"),
                    })
                }
            };
            offset += 1;

            let mode = u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]);
            offset += 4;

            let mut size_bytes = [0u8; 8];
            size_bytes.copy_from_slice(&bytes[offset..offset + 8]);
            let size = u64::from_le_bytes(size_bytes);
            offset += 8;

            let mut id_bytes = [0u8; 32];
            id_bytes.copy_from_slice(&bytes[offset..offset + 32]);
            offset += 32;

            entries.push(ManifestEntry {
                path,
                kind,
                mode,
                size,
                id: ContentId::from_bytes(id_bytes),
            });
        }

        if offset != bytes.len() {
            return Err(corrupt("trailing bytes after last entry"));
        }

        Ok(Self { entries })
    }

    /// Content id of this manifest (digest of its serialized bytes)
    pub fn id(&self) -> ContentId {
        hash_bytes(&self.serialize())
    }
}

/// Scoped accumulation of entries during one snapshot run.
///
/// Paths are tracked in an auxiliary map so duplicate detection stays O(1)
/// while the entry vector keeps traversal order.
pub struct ManifestBuilder {
    entries: Vec<ManifestEntry>,
    by_path: AHashMap<SmallVec<[u8; 64]>, usize>,
    policy: DuplicatePolicy,
}

impl ManifestBuilder {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            entries: Vec::new(),
            by_path: AHashMap::new(),
            policy,
        }
    }

    /// Append an entry, applying the duplicate-path policy
    pub fn add(&mut self, entry: ManifestEntry) -> Result<(), ManifestError> {
        let key: SmallVec<[u8; 64]> = SmallVec::from_slice(entry.path.as_bytes());

        match self.by_path.get(&key) {
            Some(&idx) => match self.policy {
                DuplicatePolicy::Reject => Err(ManifestError::DuplicatePath { path: entry.path }),
                DuplicatePolicy::Overwrite => {
                    self.entries[idx] = entry;
                    Ok(())
                }
            },
            None => {
                self.by_path.insert(key, self.entries.len());
                self.entries.push(entry);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Seal the accumulated entries into an immutable manifest
    pub fn finish(self) -> Manifest {
        Manifest {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, content: &[u8]) -> ManifestEntry {
        ManifestEntry::file(path, 0o644, content.len() as u64, hash_bytes(content))
    }

    #[test]
    fn test_builder_preserves_insertion_order() {
        let mut builder = ManifestBuilder::new(DuplicatePolicy::Reject);
        builder.add(entry("zebra.bin", b"z")).unwrap();
        builder.add(entry("alpha.bin", b"a")).unwrap();
        builder.add(entry("midway.bin", b"m")).unwrap();

        let manifest = builder.finish();
        let paths: Vec<_> = manifest.entries().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["zebra.bin", "alpha.bin", "midway.bin"]);
    }

    #[test]
    fn test_duplicate_rejected_by_default() {
        let mut builder = ManifestBuilder::new(DuplicatePolicy::default());
        builder.add(entry("asset.bin", b"one")).unwrap();

        match builder.add(entry("asset.bin", b"two")) {
            Err(ManifestError::DuplicatePath { path }) => assert_eq!(path, "asset.bin"),
            other => panic!("expected DuplicatePath, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_overwrite_keeps_later_entry() {
        let mut builder = ManifestBuilder::new(DuplicatePolicy::Overwrite);
        builder.add(entry("asset.bin", b"one")).unwrap();
        builder.add(entry("other.bin", b"x")).unwrap();
        builder.add(entry("asset.bin", b"two")).unwrap();

        let manifest = builder.finish();
        assert_eq!(manifest.len(), 2);
        assert_eq!(
            manifest.get("asset.bin").unwrap().id,
            hash_bytes(b"two"),
        );
        // Overwrite keeps the original position
        let paths: Vec<_> = manifest.entries().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["asset.bin", "other.bin"]);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut builder = ManifestBuilder::new(DuplicatePolicy::Reject);
        builder.add(entry("media/clip.mov", b"video")).unwrap();
        builder.add(entry("data/train.npz", b"dataset")).unwrap();
        builder
            .add(ManifestEntry::symlink("latest", 9, hash_bytes(b"clip.mov\n")))
            .unwrap();
        let manifest = builder.finish();

        let decoded = Manifest::deserialize(&manifest.serialize()).unwrap();
        assert_eq!(manifest, decoded);
        assert_eq!(decoded.get("latest").unwrap().kind, EntryKind::Symlink);
    }

    #[test]
    fn test_empty_manifest_roundtrip() {
        let manifest = ManifestBuilder::new(DuplicatePolicy::Reject).finish();
        assert!(manifest.is_empty());

        let decoded = Manifest::deserialize(&manifest.serialize()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_id_is_deterministic_and_order_sensitive() {
        let mut a = ManifestBuilder::new(DuplicatePolicy::Reject);
        a.add(entry("one.bin", b"1")).unwrap();
        a.add(entry("two.bin", b"2")).unwrap();

        let mut b = ManifestBuilder::new(DuplicatePolicy::Reject);
        b.add(entry("one.bin", b"1")).unwrap();
        b.add(entry("two.bin", b"2")).unwrap();

        let mut c = ManifestBuilder::new(DuplicatePolicy::Reject);
        c.add(entry("two.bin", b"2")).unwrap();
        c.add(entry("one.bin", b"1")).unwrap();

        assert_eq!(a.finish().id(), b.finish().id());
        // Different traversal order is a different manifest
        assert_ne!(
            {
                let mut d = ManifestBuilder::new(DuplicatePolicy::Reject);
                d.add(entry("one.bin", b"1")).unwrap();
                d.add(entry("two.bin", b"2")).unwrap();
                d.finish().id()
            },
            c.finish().id()
        );
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = b"XXM1".to_vec();
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            Manifest::deserialize(&bytes),
            Err(ManifestError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_truncated_entry_rejected() {
        let mut builder = ManifestBuilder::new(DuplicatePolicy::Reject);
        builder.add(entry("file.bin", b"payload")).unwrap();
        let bytes = builder.finish().serialize();

        assert!(matches!(
            Manifest::deserialize(&bytes[..bytes.len() - 5]),
            Err(ManifestError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let mut bytes = ManifestBuilder::new(DuplicatePolicy::Reject)
            .finish()
            .serialize();
        bytes.push(0xFF);
        assert!(matches!(
            Manifest::deserialize(&bytes),
            Err(ManifestError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_total_size() {
        let mut builder = ManifestBuilder::new(DuplicatePolicy::Reject);
        builder.add(entry("a.bin", b"12345")).unwrap();
        builder.add(entry("b.bin", b"123")).unwrap();
        assert_eq!(builder.finish().total_size(), 8);
    }

    #[test]
    fn test_long_paths() {
        // Longer than the SmallVec inline capacity used for dedup keys
        let long_path = "nested/".repeat(20) + "asset.bin";
        let mut builder = ManifestBuilder::new(DuplicatePolicy::Reject);
        builder.add(entry(&long_path, b"deep")).unwrap();
        assert!(matches!(
            builder.add(entry(&long_path, b"again")),
            Err(ManifestError::DuplicatePath { .. })
        ));

        let manifest = builder.finish();
        let decoded = Manifest::deserialize(&manifest.serialize()).unwrap();
        assert_eq!(decoded.get(&long_path).unwrap().id, hash_bytes(b"deep"));
    }
}
