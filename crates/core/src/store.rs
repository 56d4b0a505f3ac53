//! On-disk repository layout and atomic write helpers

use crate::object::ObjectStore;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the repository directory
pub const REPO_DIR: &str = ".bv";

/// Default configuration written at init
const DEFAULT_CONFIG: &str = r#"# BinVault configuration
[store]
version = 1
verify_existing = false  # re-hash content that dedups against an existing object

[snapshot]
workers = 4                 # bounded worker pool for hashing and storing
duplicate_paths = "reject"  # or "overwrite" (last entry wins)
unreadable = "skip"         # or "fail" (abort the run on unreadable entries)
"#;

/// Repository-layout errors
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("not a BinVault repository: {0}")]
    NotInitialized(PathBuf),

    #[error("repository layout damaged: missing {0}")]
    MissingLayout(String),

    #[error("invalid path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("repository I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RepoError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Handle on one repository's on-disk layout
///
/// ```text
/// .bv/
///   config.toml
///   objects/
///     blobs/        content-addressed file objects
///     manifests/    content-addressed serialized manifests
///   patches/        tag registry: <tag>.json, append-only
///   locks/
///   tmp/
///     ingest/
/// ```
#[derive(Debug)]
pub struct Repo {
    root: PathBuf,
    bv_dir: PathBuf,
}

impl Repo {
    /// Initialize a new repository at the given root
    pub fn init(root: &Path) -> Result<Self, RepoError> {
        let bv_dir = root.join(REPO_DIR);
        if bv_dir.exists() {
            return Err(RepoError::AlreadyInitialized(root.to_path_buf()));
        }

        fs::create_dir(&bv_dir).map_err(|e| RepoError::io(&bv_dir, e))?;
        for dir in [
            "objects/blobs",
            "objects/manifests",
            "patches",
            "locks",
            "tmp/ingest",
        ] {
            let path = bv_dir.join(dir);
            fs::create_dir_all(&path).map_err(|e| RepoError::io(&path, e))?;
        }

        let config_path = bv_dir.join("config.toml");
        fs::write(&config_path, DEFAULT_CONFIG).map_err(|e| RepoError::io(&config_path, e))?;

        tracing::info!(root = %root.display(), "initialized repository");

        Ok(Self {
            root: root.to_path_buf(),
            bv_dir,
        })
    }

    /// Open an existing repository, validating the layout
    pub fn open(root: &Path) -> Result<Self, RepoError> {
        let bv_dir = root.join(REPO_DIR);
        if !bv_dir.is_dir() {
            return Err(RepoError::NotInitialized(root.to_path_buf()));
        }

        for dir in ["objects/blobs", "objects/manifests", "patches", "tmp/ingest"] {
            if !bv_dir.join(dir).is_dir() {
                return Err(RepoError::MissingLayout(dir.to_string()));
            }
        }
        if !bv_dir.join("config.toml").is_file() {
            return Err(RepoError::MissingLayout("config.toml".to_string()));
        }

        Ok(Self {
            root: root.to_path_buf(),
            bv_dir,
        })
    }

    /// Create an object store over this repository's object area
    pub fn object_store(&self, verify_existing: bool) -> ObjectStore {
        ObjectStore::new(self.bv_dir.clone()).with_verification(verify_existing)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the `.bv` directory
    pub fn bv_dir(&self) -> &Path {
        &self.bv_dir
    }

    /// Path to the tag registry directory
    pub fn patches_dir(&self) -> PathBuf {
        self.bv_dir.join("patches")
    }

    /// Path to the manifest object area
    pub fn manifests_dir(&self) -> PathBuf {
        self.bv_dir.join("objects").join("manifests")
    }

    /// Path to the scratch area for atomic writes
    pub fn tmp_dir(&self) -> PathBuf {
        self.bv_dir.join("tmp")
    }
}

/// Write data to a temporary file, fsync it, then rename it onto the
/// target path. The rename is the single publish step: a crash mid-write
/// never leaves a partial file visible at `target`.
pub fn atomic_write(tmp_dir: &Path, target: &Path, data: &[u8]) -> io::Result<()> {
    fs::create_dir_all(tmp_dir)?;

    let temp_path = tmp_dir.join(uuid::Uuid::new_v4().to_string());
    let mut temp_file = File::create(&temp_path)?;
    temp_file.write_all(data)?;
    temp_file.sync_all()?;
    drop(temp_file);

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(&temp_path, target)?;

    if let Some(parent) = target.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

/// Normalize a traversal path for storage.
///
/// Rejects absolute paths and `..` components, strips a leading `./`, and
/// converts separators to `/`.
pub fn normalize_path(path: &Path) -> Result<String, RepoError> {
    if path.is_absolute() {
        return Err(RepoError::InvalidPath {
            path: path.to_path_buf(),
            reason: "absolute paths not allowed".to_string(),
        });
    }

    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                return Err(RepoError::InvalidPath {
                    path: path.to_path_buf(),
                    reason: "path traversal not allowed".to_string(),
                })
            }
            std::path::Component::RootDir | std::path::Component::Prefix(_) => {
                return Err(RepoError::InvalidPath {
                    path: path.to_path_buf(),
                    reason: "absolute paths not allowed".to_string(),
                })
            }
            _ => {}
        }
    }

    let path_str = path.to_string_lossy();
    let normalized = path_str.strip_prefix("./").unwrap_or(&path_str);
    Ok(normalized.replace('\\', "/"))
}

/// Whether a working-tree path belongs to repository internals
pub fn should_ignore(path: &Path) -> bool {
    path.starts_with(REPO_DIR) || path.starts_with(".git")
}
