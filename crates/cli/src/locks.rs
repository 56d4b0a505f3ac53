//! File locks for operations that must not run concurrently

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Init operation lock - prevents concurrent init in one directory
pub struct InitLock {
    path: PathBuf,
    #[allow(dead_code)]
    file: File,
}

impl InitLock {
    /// Acquire the init lock at the repository root (non-blocking)
    pub fn acquire(root: &Path) -> Result<Self> {
        let lock_path = root.join(".bv-init.lock");

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)
            .context("Failed to open init lock file")?;

        if !try_flock_exclusive(&file)? {
            anyhow::bail!("Another init operation is in progress");
        }

        Ok(Self {
            path: lock_path,
            file,
        })
    }
}

impl Drop for InitLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Try to acquire an exclusive file lock (non-blocking)
#[cfg(unix)]
fn try_flock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn try_flock_exclusive(_file: &File) -> Result<bool> {
    // No advisory locks on this platform; init collisions are caught by
    // the repository's own already-initialized check
    Ok(true)
}
