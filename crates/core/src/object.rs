//! Deduplicated, content-addressed object storage
//!
//! Objects live under `objects/blobs/<hh>/<rest-of-hex>` inside the
//! repository directory. An object's location is derived from its
//! [`ContentId`] and nothing else, so the existence check and the write are
//! safe to repeat and safe to race: concurrent writers of the same id
//! produce identical bytes and the atomic rename publishes exactly one copy.

use crate::hash::{hash_bytes, hash_file, ContentId, IncrementalHasher};
use dashmap::DashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Read/write chunk size for streaming object I/O
const COPY_BUF_SIZE: usize = 64 * 1024;

/// Errors raised by the object store
#[derive(Debug, Error)]
pub enum StoreError {
    /// No object is stored under this id
    #[error("object not found: {id}")]
    NotFound { id: ContentId },

    /// Content under (or arriving for) an id does not hash to that id
    #[error("hash mismatch for object {id}: content hashes to {actual}")]
    HashMismatch { id: ContentId, actual: ContentId },

    /// I/O failure in the object area, with the offending path
    #[error("object store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Content-addressed object storage with at-most-one physical copy per id
pub struct ObjectStore {
    /// Repository directory (`.bv/`) holding the object area
    bv_dir: PathBuf,
    /// Presence cache: id -> stored size in bytes
    known: DashMap<ContentId, u64>,
    /// Re-hash incoming content that dedups against an existing object
    verify_existing: bool,
}

impl ObjectStore {
    pub fn new(bv_dir: PathBuf) -> Self {
        Self {
            bv_dir,
            known: DashMap::new(),
            verify_existing: false,
        }
    }

    /// Enable or disable re-hash verification of dedup hits
    pub fn with_verification(mut self, verify_existing: bool) -> Self {
        self.verify_existing = verify_existing;
        self
    }

    /// Check whether an object exists. No side effects beyond cache fill.
    pub fn contains(&self, id: ContentId) -> bool {
        if self.known.contains_key(&id) {
            return true;
        }

        let path = self.object_path(id);
        match fs::metadata(&path) {
            Ok(meta) => {
                self.known.insert(id, meta.len());
                true
            }
            Err(_) => false,
        }
    }

    /// Size in bytes of a stored object
    pub fn stored_size(&self, id: ContentId) -> Result<u64, StoreError> {
        if let Some(size) = self.known.get(&id) {
            return Ok(*size);
        }
        let path = self.object_path(id);
        let meta = fs::metadata(&path).map_err(|_| StoreError::NotFound { id })?;
        self.known.insert(id, meta.len());
        Ok(meta.len())
    }

    /// Store a file's content under `id`.
    ///
    /// Returns the number of bytes newly persisted: 0 when the object was
    /// already present (idempotent no-op), the object size otherwise. The
    /// source is re-hashed while streaming; if the digest disagrees with
    /// `id` (the file changed since it was hashed, or the caller passed a
    /// stale id) nothing is published and `HashMismatch` is returned.
    pub fn put_file(&self, id: ContentId, src: &Path) -> Result<u64, StoreError> {
        if self.contains(id) {
            if self.verify_existing {
                let actual = hash_file(src).map_err(|e| StoreError::io(src, e))?;
                if actual != id {
                    return Err(StoreError::HashMismatch { id, actual });
                }
            }
            return Ok(0);
        }

        let file = File::open(src).map_err(|e| StoreError::io(src, e))?;
        let mut reader = BufReader::new(file);
        self.ingest(id, &mut reader, src)
    }

    /// Store an in-memory byte slice under `id` (symlink targets, tests)
    pub fn put_bytes(&self, id: ContentId, data: &[u8]) -> Result<u64, StoreError> {
        if self.contains(id) {
            if self.verify_existing {
                let actual = hash_bytes(data);
                if actual != id {
                    return Err(StoreError::HashMismatch { id, actual });
                }
            }
            return Ok(0);
        }

        let mut reader = data;
        self.ingest(id, &mut reader, Path::new("<memory>"))
    }

    /// Stream content into a temp file, verify its digest, then publish it
    /// under the content-addressed path with a single atomic rename.
    fn ingest(
        &self,
        id: ContentId,
        reader: &mut impl Read,
        origin: &Path,
    ) -> Result<u64, StoreError> {
        let tmp_dir = self.bv_dir.join("tmp").join("ingest");
        fs::create_dir_all(&tmp_dir).map_err(|e| StoreError::io(&tmp_dir, e))?;

        let temp_path = tmp_dir.join(format!("{}-{}", uuid::Uuid::new_v4(), id.to_hex()));
        let mut temp_file = File::create(&temp_path).map_err(|e| StoreError::io(&temp_path, e))?;

        let mut hasher = IncrementalHasher::new();
        let mut buffer = [0u8; COPY_BUF_SIZE];
        let mut written = 0u64;
        loop {
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(StoreError::io(origin, e));
                }
            };
            hasher.update(&buffer[..n]);
            if let Err(e) = temp_file.write_all(&buffer[..n]) {
                let _ = fs::remove_file(&temp_path);
                return Err(StoreError::io(&temp_path, e));
            }
            written += n as u64;
        }

        let actual = hasher.finalize();
        if actual != id {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::HashMismatch { id, actual });
        }

        temp_file
            .sync_all()
            .map_err(|e| StoreError::io(&temp_path, e))?;
        drop(temp_file);

        let final_path = self.object_path(id);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        fs::rename(&temp_path, &final_path).map_err(|e| StoreError::io(&final_path, e))?;

        // Fsync parent directory so the rename itself is durable
        if let Some(parent) = final_path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        self.known.insert(id, written);
        Ok(written)
    }

    /// Open a lazy streaming reader over an object's bytes
    pub fn reader(&self, id: ContentId) -> Result<ObjectReader, StoreError> {
        let path = self.object_path(id);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound { id })
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let len = file.metadata().map_err(|e| StoreError::io(&path, e))?.len();
        Ok(ObjectReader {
            inner: BufReader::new(file),
            len,
        })
    }

    /// Stream an object into `dest`, verifying the digest as it goes.
    ///
    /// A digest disagreement at EOF means the stored object was corrupted
    /// out-of-band and is reported as `HashMismatch`, never silently passed
    /// through. Returns the number of bytes written.
    pub fn copy_verified(&self, id: ContentId, dest: &mut impl Write) -> Result<u64, StoreError> {
        let path = self.object_path(id);
        let mut reader = self.reader(id)?;

        let mut hasher = IncrementalHasher::new();
        let mut buffer = [0u8; COPY_BUF_SIZE];
        let mut copied = 0u64;
        loop {
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => return Err(StoreError::io(&path, e)),
            };
            hasher.update(&buffer[..n]);
            dest.write_all(&buffer[..n])
                .map_err(|e| StoreError::io(&path, e))?;
            copied += n as u64;
        }

        let actual = hasher.finalize();
        if actual != id {
            return Err(StoreError::HashMismatch { id, actual });
        }
        Ok(copied)
    }

    /// Read a whole object into memory, verifying its digest
    pub fn read_bytes(&self, id: ContentId) -> Result<Vec<u8>, StoreError> {
        let mut data = Vec::new();
        self.copy_verified(id, &mut data)?;
        Ok(data)
    }

    /// Filesystem path for an object: `objects/blobs/<hh>/<rest>`
    fn object_path(&self, id: ContentId) -> PathBuf {
        let hex = id.to_hex();
        let (prefix, rest) = hex.split_at(2);
        self.bv_dir
            .join("objects")
            .join("blobs")
            .join(prefix)
            .join(rest)
    }
}

/// Lazy streaming reader over one stored object
pub struct ObjectReader {
    inner: BufReader<File>,
    len: u64,
}

impl ObjectReader {
    /// Stored length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Read for ObjectReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> ObjectStore {
        ObjectStore::new(dir.to_path_buf())
    }

    #[test]
    fn test_put_read_roundtrip() -> Result<(), StoreError> {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        let data = b"raw asset bytes";
        let id = hash_bytes(data);

        let written = store.put_bytes(id, data)?;
        assert_eq!(written, data.len() as u64);
        assert_eq!(store.read_bytes(id)?, data);
        Ok(())
    }

    #[test]
    fn test_put_is_idempotent() -> Result<(), StoreError> {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        let data = b"stored once";
        let id = hash_bytes(data);

        assert_eq!(store.put_bytes(id, data)?, data.len() as u64);
        assert_eq!(store.put_bytes(id, data)?, 0);
        assert_eq!(store.put_bytes(id, data)?, 0);
        assert_eq!(store.read_bytes(id)?, data);
        Ok(())
    }

    #[test]
    fn test_put_file_streams_from_disk() -> Result<(), StoreError> {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        let src = temp.path().join("asset.bin");
        let data = vec![0x5A; 256 * 1024];
        std::fs::write(&src, &data).unwrap();

        let id = hash_file(&src).unwrap();
        assert_eq!(store.put_file(id, &src)?, data.len() as u64);
        assert_eq!(store.put_file(id, &src)?, 0);
        assert_eq!(store.read_bytes(id)?, data);
        Ok(())
    }

    #[test]
    fn test_contains() -> Result<(), StoreError> {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        let data = b"present";
        let id = hash_bytes(data);

        assert!(!store.contains(id));
        store.put_bytes(id, data)?;
        assert!(store.contains(id));
        Ok(())
    }

    #[test]
    fn test_fanout_layout() -> Result<(), StoreError> {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        let data = b"layout";
        let id = hash_bytes(data);
        let hex = id.to_hex();

        store.put_bytes(id, data)?;

        let expected = temp
            .path()
            .join("objects")
            .join("blobs")
            .join(&hex[0..2])
            .join(&hex[2..]);
        assert!(expected.exists());
        Ok(())
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        let id = ContentId::from_bytes([0xFF; 32]);
        match store.read_bytes(id) {
            Err(StoreError::NotFound { id: missing }) => assert_eq!(missing, id),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_put_wrong_id_is_mismatch_and_publishes_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        let id = hash_bytes(b"expected content");
        match store.put_bytes(id, b"different content") {
            Err(StoreError::HashMismatch { id: claimed, .. }) => assert_eq!(claimed, id),
            other => panic!("expected HashMismatch, got {other:?}"),
        }
        assert!(!store.contains(id));
    }

    #[test]
    fn test_verify_existing_catches_changed_source() -> Result<(), StoreError> {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path()).with_verification(true);

        let src = temp.path().join("mutating.bin");
        std::fs::write(&src, b"version one").unwrap();
        let id = hash_file(&src).unwrap();
        store.put_file(id, &src)?;

        // Source changes after hashing; a repeated put under the stale id
        // must be rejected rather than silently deduplicated.
        std::fs::write(&src, b"version two").unwrap();
        assert!(matches!(
            store.put_file(id, &src),
            Err(StoreError::HashMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_copy_verified_detects_corruption() -> Result<(), StoreError> {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        let data = b"soon to be corrupted";
        let id = hash_bytes(data);
        store.put_bytes(id, data)?;

        // Corrupt the object file out-of-band
        let hex = id.to_hex();
        let path = temp
            .path()
            .join("objects")
            .join("blobs")
            .join(&hex[0..2])
            .join(&hex[2..]);
        std::fs::write(&path, b"corrupted bytes!!!!!").unwrap();

        // Fresh store so the presence cache is cold
        let store = store_in(temp.path());
        let mut sink = Vec::new();
        assert!(matches!(
            store.copy_verified(id, &mut sink),
            Err(StoreError::HashMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_interrupted_ingest_leaves_nothing_visible() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        // Simulate a crash mid-put: a temp file exists but was never renamed
        let data = b"half written";
        let id = hash_bytes(data);
        let tmp_dir = temp.path().join("tmp").join("ingest");
        std::fs::create_dir_all(&tmp_dir).unwrap();
        std::fs::write(tmp_dir.join(format!("dead-{}", id.to_hex())), &data[..4]).unwrap();

        assert!(!store.contains(id));
        assert!(matches!(
            store.read_bytes(id),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_empty_object() -> Result<(), StoreError> {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        let id = hash_bytes(b"");
        assert_eq!(store.put_bytes(id, b"")?, 0);
        assert!(store.contains(id));
        assert_eq!(store.read_bytes(id)?, b"");
        Ok(())
    }

    #[test]
    fn test_streaming_reader_reports_length() -> Result<(), StoreError> {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        let data = vec![7u8; 10_000];
        let id = hash_bytes(&data);
        store.put_bytes(id, &data)?;

        let mut reader = store.reader(id)?;
        assert_eq!(reader.len(), data.len() as u64);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        Ok(())
    }
}
