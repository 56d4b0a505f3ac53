//! Working-tree traversal: a lazy, finite sequence of snapshot candidates
//!
//! The walker yields files and symlinks one at a time so memory stays
//! bounded regardless of tree size. Entries it cannot read are yielded as
//! explicit skip items, never dropped silently; the snapshot engine
//! applies the configured skip/fail policy.

use bv_core::store::{normalize_path, should_ignore};
use bv_core::EntryKind;
use std::path::{Path, PathBuf};

/// One traversal hit: a file or symlink eligible for the snapshot
#[derive(Debug, Clone)]
pub struct WalkedEntry {
    /// Repository-relative path, `/`-separated
    pub rel_path: String,
    /// Absolute path for opening the content
    pub abs_path: PathBuf,
    pub kind: EntryKind,
    /// Unix permission bits (0o120000 for symlinks)
    pub mode: u32,
    /// Content size in bytes (symlinks: target length)
    pub size: u64,
}

/// An entry the traversal could not read
#[derive(Debug, Clone)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: String,
}

/// Lazy traversal over one working tree.
///
/// Produced once per snapshot run and not reusable across runs.
/// Directory entries are visited in sorted order so manifest order is
/// reproducible for an unchanged tree.
pub struct Walker {
    root: PathBuf,
    inner: walkdir::IntoIter,
}

/// Start a traversal rooted at `root`, skipping `.bv/` and `.git/`
pub fn walk(root: &Path) -> Walker {
    let inner = walkdir::WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();
    Walker {
        root: root.to_path_buf(),
        inner,
    }
}

impl Iterator for Walker {
    type Item = Result<WalkedEntry, SkippedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    return Some(Err(SkippedEntry {
                        path,
                        reason: e.to_string(),
                    }));
                }
            };

            let rel = match entry.path().strip_prefix(&self.root) {
                Ok(rel) if rel.as_os_str().is_empty() => continue, // the root itself
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };

            if should_ignore(&rel) {
                if entry.file_type().is_dir() {
                    self.inner.skip_current_dir();
                }
                continue;
            }

            if entry.file_type().is_dir() {
                continue; // directories materialize implicitly on checkout
            }

            let rel_path = match normalize_path(&rel) {
                Ok(p) => p,
                Err(e) => {
                    return Some(Err(SkippedEntry {
                        path: entry.path().to_path_buf(),
                        reason: e.to_string(),
                    }))
                }
            };

            if entry.file_type().is_symlink() {
                return Some(match std::fs::read_link(entry.path()) {
                    Ok(target) => Ok(WalkedEntry {
                        rel_path,
                        abs_path: entry.path().to_path_buf(),
                        kind: EntryKind::Symlink,
                        mode: 0o120000,
                        size: target.as_os_str().len() as u64,
                    }),
                    Err(e) => Err(SkippedEntry {
                        path: entry.path().to_path_buf(),
                        reason: e.to_string(),
                    }),
                });
            }

            return Some(match entry.metadata() {
                Ok(meta) => Ok(WalkedEntry {
                    rel_path,
                    abs_path: entry.path().to_path_buf(),
                    kind: EntryKind::File,
                    mode: mode_bits(&meta),
                    size: meta.len(),
                }),
                Err(e) => Err(SkippedEntry {
                    path: entry.path().to_path_buf(),
                    reason: e.to_string(),
                }),
            });
        }
    }
}

#[cfg(unix)]
fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_bits(_meta: &std::fs::Metadata) -> u32 {
    0o644
}
