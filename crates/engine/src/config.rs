//! Engine configuration, loaded from `.bv/config.toml`

use bv_core::DuplicatePolicy;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Policy for entries the traversal cannot read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnreadablePolicy {
    /// Record the entry in the summary and continue
    #[default]
    Skip,
    /// Abort the snapshot run
    Fail,
}

/// Duplicate-path policy as spelled in config.toml
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePathPolicy {
    #[default]
    Reject,
    Overwrite,
}

impl From<DuplicatePathPolicy> for DuplicatePolicy {
    fn from(policy: DuplicatePathPolicy) -> Self {
        match policy {
            DuplicatePathPolicy::Reject => DuplicatePolicy::Reject,
            DuplicatePathPolicy::Overwrite => DuplicatePolicy::Overwrite,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub version: u32,
    /// Re-hash incoming content that dedups against an existing object
    pub verify_existing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            version: 1,
            verify_existing: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Worker pool size for hashing and storing files
    pub workers: usize,
    pub duplicate_paths: DuplicatePathPolicy,
    pub unreadable: UnreadablePolicy,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            duplicate_paths: DuplicatePathPolicy::default(),
            unreadable: UnreadablePolicy::default(),
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub snapshot: SnapshotConfig,
}

impl Config {
    /// Load from a repository's `config.toml`
    pub fn load(bv_dir: &Path) -> Result<Self, ConfigError> {
        let path = bv_dir.join("config.toml");
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        let mut config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })?;
        if config.snapshot.workers == 0 {
            config.snapshot.workers = 1;
        }
        Ok(config)
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.snapshot.duplicate_paths.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store.version, 1);
        assert!(!config.store.verify_existing);
        assert_eq!(config.snapshot.workers, 4);
        assert_eq!(config.snapshot.duplicate_paths, DuplicatePathPolicy::Reject);
        assert_eq!(config.snapshot.unreadable, UnreadablePolicy::Skip);
    }

    #[test]
    fn test_load_seeded_config() {
        let temp = tempfile::tempdir().unwrap();
        let repo = bv_core::Repo::init(temp.path()).unwrap();

        let config = Config::load(repo.bv_dir()).unwrap();
        assert_eq!(config.snapshot.workers, 4);
        assert_eq!(config.snapshot.unreadable, UnreadablePolicy::Skip);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(
            temp.path().join("config.toml"),
            "[snapshot]\nworkers = 8\n",
        )
        .unwrap();

        let config = Config::load(temp.path()).unwrap();
        assert_eq!(config.snapshot.workers, 8);
        assert_eq!(config.store.version, 1);
    }

    #[test]
    fn test_unknown_policy_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(
            temp.path().join("config.toml"),
            "[snapshot]\nduplicate_paths = \"merge\"\n",
        )
        .unwrap();

        assert!(matches!(
            Config::load(temp.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_zero_workers_clamped() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("config.toml"), "[snapshot]\nworkers = 0\n").unwrap();

        let config = Config::load(temp.path()).unwrap();
        assert_eq!(config.snapshot.workers, 1);
    }
}
