//! Patch index: the append-only tag -> manifest registry
//!
//! Tags are files under `.bv/patches/<tag>.json`. Registration is a
//! compare-and-set: the fully written record is published with a hard
//! link, which fails atomically if the tag already exists, so no crash
//! can leave a tag pointing at a partial record and no two committers
//! can both win the same tag.

use crate::patch::{valid_tag, PatchRecord, PatchStats};
use bv_core::store::atomic_write;
use bv_core::{ContentId, Manifest, ManifestError, Repo};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Patch-index errors
#[derive(Debug, Error)]
pub enum IndexError {
    /// Tags are immutable; committing an existing tag is rejected
    #[error("tag already exists: {0}")]
    TagAlreadyExists(String),

    #[error("tag not found: {0}")]
    TagNotFound(String),

    #[error("invalid tag name: {0:?} (allowed: [A-Za-z0-9._-], no leading '.')")]
    InvalidTag(String),

    /// A tag record failed to parse
    #[error("corrupt patch record for tag {tag}: {reason}")]
    CorruptRecord { tag: String, reason: String },

    /// A stored manifest is absent from the object area
    #[error("manifest {id} for tag {tag} is missing from the store")]
    ManifestMissing { tag: String, id: ContentId },

    /// A stored manifest no longer hashes to the id its tag records
    #[error("manifest integrity failure for tag {tag}: expected {expected}, found {actual}")]
    ManifestIntegrity {
        tag: String,
        expected: ContentId,
        actual: ContentId,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("patch index I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl IndexError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// The tag registry for one repository
pub struct PatchIndex {
    patches_dir: PathBuf,
    manifests_dir: PathBuf,
    tmp_dir: PathBuf,
    /// Serializes in-process commits; the on-disk link is the arbiter
    /// across processes
    commit_lock: Mutex<()>,
}

impl PatchIndex {
    pub fn new(repo: &Repo) -> Self {
        Self {
            patches_dir: repo.patches_dir(),
            manifests_dir: repo.manifests_dir(),
            tmp_dir: repo.tmp_dir(),
            commit_lock: Mutex::new(()),
        }
    }

    /// Durably record a manifest and register it under `tag`.
    ///
    /// The manifest object is written first; the tag record is published
    /// only afterwards. A crash between the two steps leaves an orphaned
    /// manifest object (unreferenced, benign) and no visible tag.
    pub fn commit(
        &self,
        tag: &str,
        manifest: &Manifest,
        stats: PatchStats,
    ) -> Result<PatchRecord, IndexError> {
        if !valid_tag(tag) {
            return Err(IndexError::InvalidTag(tag.to_string()));
        }

        let _guard = self.commit_lock.lock();

        let tag_path = self.tag_path(tag);
        if tag_path.exists() {
            return Err(IndexError::TagAlreadyExists(tag.to_string()));
        }

        self.store_manifest(manifest)?;

        let record = PatchRecord::new(tag, manifest.id(), stats);
        let json = record.to_json().map_err(|e| IndexError::CorruptRecord {
            tag: tag.to_string(),
            reason: e.to_string(),
        })?;

        // Write the record fully, fsync, then publish with a hard link:
        // link creation fails if the target exists, so the registry file
        // is either absent or complete.
        let staging = self.tmp_dir.join(format!("patch-{}.json", record.id));
        let write_staging = || -> io::Result<()> {
            let mut file = File::create(&staging)?;
            io::Write::write_all(&mut file, &json)?;
            file.sync_all()
        };
        write_staging().map_err(|e| IndexError::io(&staging, e))?;

        let publish = fs::hard_link(&staging, &tag_path);
        let _ = fs::remove_file(&staging);
        match publish {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(IndexError::TagAlreadyExists(tag.to_string()));
            }
            Err(e) => return Err(IndexError::io(&tag_path, e)),
        }

        if let Ok(dir) = File::open(&self.patches_dir) {
            let _ = dir.sync_all();
        }

        tracing::info!(tag, manifest = %record.manifest, files = stats.files, "committed patch");
        Ok(record)
    }

    /// Resolve a tag to its patch record
    pub fn resolve(&self, tag: &str) -> Result<PatchRecord, IndexError> {
        let tag_path = self.tag_path(tag);
        let bytes = match fs::read(&tag_path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(IndexError::TagNotFound(tag.to_string()))
            }
            Err(e) => return Err(IndexError::io(&tag_path, e)),
        };

        PatchRecord::from_json(&bytes).map_err(|e| IndexError::CorruptRecord {
            tag: tag.to_string(),
            reason: e.to_string(),
        })
    }

    /// All tags, sorted; complete and duplicate-free
    pub fn list(&self) -> Result<Vec<String>, IndexError> {
        let mut tags = Vec::new();
        let entries =
            fs::read_dir(&self.patches_dir).map_err(|e| IndexError::io(&self.patches_dir, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| IndexError::io(&self.patches_dir, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(tag) = name.strip_suffix(".json") {
                tags.push(tag.to_string());
            }
        }

        tags.sort();
        Ok(tags)
    }

    /// Load and integrity-check the manifest a record points at
    pub fn load_manifest(&self, record: &PatchRecord) -> Result<Manifest, IndexError> {
        let path = self.manifest_path(record.manifest);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(IndexError::ManifestMissing {
                    tag: record.tag.clone(),
                    id: record.manifest,
                })
            }
            Err(e) => return Err(IndexError::io(&path, e)),
        };

        let manifest = Manifest::deserialize(&bytes)?;
        let actual = manifest.id();
        if actual != record.manifest {
            return Err(IndexError::ManifestIntegrity {
                tag: record.tag.clone(),
                expected: record.manifest,
                actual,
            });
        }
        Ok(manifest)
    }

    /// Persist a manifest into the content-addressed manifest area.
    /// Idempotent: an already-stored manifest is left untouched.
    fn store_manifest(&self, manifest: &Manifest) -> Result<ContentId, IndexError> {
        let bytes = manifest.serialize();
        let id = bv_core::hash_bytes(&bytes);
        let path = self.manifest_path(id);

        if !path.exists() {
            atomic_write(&self.tmp_dir.join("ingest"), &path, &bytes)
                .map_err(|e| IndexError::io(&path, e))?;
        }
        Ok(id)
    }

    fn tag_path(&self, tag: &str) -> PathBuf {
        self.patches_dir.join(format!("{tag}.json"))
    }

    fn manifest_path(&self, id: ContentId) -> PathBuf {
        let hex = id.to_hex();
        let (prefix, rest) = hex.split_at(2);
        self.manifests_dir.join(prefix).join(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_core::{hash_bytes, DuplicatePolicy, ManifestBuilder, ManifestEntry};
    use std::path::Path;

    fn manifest_of(paths: &[(&str, &[u8])]) -> Manifest {
        let mut builder = ManifestBuilder::new(DuplicatePolicy::Reject);
        for (path, content) in paths {
            builder
                .add(ManifestEntry::file(
                    *path,
                    0o644,
                    content.len() as u64,
                    hash_bytes(content),
                ))
                .unwrap();
        }
        builder.finish()
    }

    fn open_index(root: &Path) -> (Repo, PatchIndex) {
        let repo = Repo::init(root).unwrap();
        let index = PatchIndex::new(&repo);
        (repo, index)
    }

    #[test]
    fn test_commit_then_resolve() {
        let temp = tempfile::tempdir().unwrap();
        let (_repo, index) = open_index(temp.path());

        let manifest = manifest_of(&[("a.bin", b"alpha")]);
        let record = index.commit("v1", &manifest, PatchStats::default()).unwrap();

        let resolved = index.resolve("v1").unwrap();
        assert_eq!(resolved.id, record.id);
        assert_eq!(resolved.manifest, manifest.id());
    }

    #[test]
    fn test_commit_duplicate_tag_rejected_and_prior_kept() {
        let temp = tempfile::tempdir().unwrap();
        let (_repo, index) = open_index(temp.path());

        let first = manifest_of(&[("a.bin", b"alpha")]);
        let original = index.commit("v1", &first, PatchStats::default()).unwrap();

        let second = manifest_of(&[("b.bin", b"beta")]);
        match index.commit("v1", &second, PatchStats::default()) {
            Err(IndexError::TagAlreadyExists(tag)) => assert_eq!(tag, "v1"),
            other => panic!("expected TagAlreadyExists, got {other:?}"),
        }

        // The prior record is untouched
        let resolved = index.resolve("v1").unwrap();
        assert_eq!(resolved.id, original.id);
        assert_eq!(resolved.manifest, first.id());
    }

    #[test]
    fn test_resolve_unknown_tag() {
        let temp = tempfile::tempdir().unwrap();
        let (_repo, index) = open_index(temp.path());

        assert!(matches!(
            index.resolve("nope"),
            Err(IndexError::TagNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_tag_names_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let (_repo, index) = open_index(temp.path());
        let manifest = manifest_of(&[]);

        for bad in ["", ".hidden", "a/b", "tag name", "../up"] {
            assert!(matches!(
                index.commit(bad, &manifest, PatchStats::default()),
                Err(IndexError::InvalidTag(_))
            ));
        }
    }

    #[test]
    fn test_list_is_sorted_and_complete() {
        let temp = tempfile::tempdir().unwrap();
        let (_repo, index) = open_index(temp.path());

        for tag in ["v2", "v10", "v1"] {
            let manifest = manifest_of(&[(tag, tag.as_bytes())]);
            index.commit(tag, &manifest, PatchStats::default()).unwrap();
        }

        assert_eq!(index.list().unwrap(), ["v1", "v10", "v2"]);
    }

    #[test]
    fn test_load_manifest_roundtrip() {
        let temp = tempfile::tempdir().unwrap();
        let (_repo, index) = open_index(temp.path());

        let manifest = manifest_of(&[("x.bin", b"xx"), ("y.bin", b"yy")]);
        let record = index.commit("v1", &manifest, PatchStats::default()).unwrap();

        let loaded = index.load_manifest(&record).unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn test_load_manifest_detects_corruption() {
        let temp = tempfile::tempdir().unwrap();
        let (_repo, index) = open_index(temp.path());

        let manifest = manifest_of(&[("x.bin", b"xx")]);
        let record = index.commit("v1", &manifest, PatchStats::default()).unwrap();

        // Damage the stored manifest: valid format, different content
        let other = manifest_of(&[("z.bin", b"zz")]);
        let path = index.manifest_path(record.manifest);
        fs::write(&path, other.serialize()).unwrap();

        assert!(matches!(
            index.load_manifest(&record),
            Err(IndexError::ManifestIntegrity { .. })
        ));
    }

    #[test]
    fn test_load_manifest_missing_object() {
        let temp = tempfile::tempdir().unwrap();
        let (_repo, index) = open_index(temp.path());

        let manifest = manifest_of(&[("x.bin", b"xx")]);
        let record = index.commit("v1", &manifest, PatchStats::default()).unwrap();

        fs::remove_file(index.manifest_path(record.manifest)).unwrap();
        assert!(matches!(
            index.load_manifest(&record),
            Err(IndexError::ManifestMissing { .. })
        ));
    }

    #[test]
    fn test_empty_manifest_commit() {
        let temp = tempfile::tempdir().unwrap();
        let (_repo, index) = open_index(temp.path());

        let manifest = manifest_of(&[]);
        let record = index.commit("empty", &manifest, PatchStats::default()).unwrap();
        let loaded = index.load_manifest(&record).unwrap();
        assert!(loaded.is_empty());
    }
}
