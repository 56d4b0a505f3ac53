//! Snapshot creation: traverse, hash, store, commit
//!
//! Files are hashed and stored by a bounded worker pool; each file is an
//! independent unit of work, so one slow or failing file never stalls the
//! rest. Results carry the traversal sequence number, which keeps
//! manifest order equal to traversal order regardless of worker
//! scheduling. The single serialization point is the tag registration at
//! commit time. Any per-file failure aborts the whole run before commit,
//! so a failed run leaves stored objects (benign, deduplicated) but never
//! a visible tag.

use crate::config::{Config, UnreadablePolicy};
use crate::index::{IndexError, PatchIndex};
use crate::patch::{valid_tag, PatchRecord, PatchStats};
use crate::traverse::{walk, SkippedEntry, WalkedEntry};
use bv_core::{
    hash_bytes, hash_file, ContentId, EntryKind, ManifestBuilder, ManifestEntry, ManifestError,
    ObjectStore, Repo, StoreError,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Snapshot-creation errors
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// An unreadable entry under the `fail` policy
    #[error("unreadable entry {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What one snapshot run did
#[derive(Debug, Clone, Default)]
pub struct SnapshotSummary {
    /// Files recorded from traversal
    pub files_scanned: u64,
    /// Distinct objects newly persisted by this run
    pub objects_stored: u64,
    /// Bytes newly persisted by this run
    pub bytes_stored: u64,
    /// Total content size across scanned files
    pub bytes_scanned: u64,
    /// Entries skipped under the `skip` policy
    pub skipped: Vec<SkippedEntry>,
}

/// Result of hashing and storing one traversal entry
struct FileOutcome {
    entry: ManifestEntry,
    /// Whether this worker persisted the object (false on a dedup hit)
    newly_stored: bool,
}

/// Create a snapshot of `source_root` and register it under `tag`.
///
/// An empty traversal is valid and commits an empty manifest.
pub fn create_snapshot(
    repo: &Repo,
    config: &Config,
    source_root: &Path,
    tag: &str,
) -> Result<(PatchRecord, SnapshotSummary), SnapshotError> {
    if !valid_tag(tag) {
        return Err(IndexError::InvalidTag(tag.to_string()).into());
    }

    let index = PatchIndex::new(repo);
    // Cheap early check; the commit below remains the arbiter
    if index.resolve(tag).is_ok() {
        return Err(IndexError::TagAlreadyExists(tag.to_string()).into());
    }

    let store = repo.object_store(config.store.verify_existing);
    let workers = config.snapshot.workers.max(1);

    tracing::info!(tag, root = %source_root.display(), workers, "creating snapshot");

    let mut skipped = Vec::new();
    let mut walk_failure: Option<SnapshotError> = None;
    let mut outcomes: Vec<Option<FileOutcome>> = Vec::new();
    let mut first_error: Option<(usize, SnapshotError)> = None;

    std::thread::scope(|scope| {
        let (job_tx, job_rx) = crossbeam_channel::bounded::<(usize, WalkedEntry)>(workers * 2);
        let (result_tx, result_rx) =
            crossbeam_channel::unbounded::<(usize, Result<FileOutcome, SnapshotError>)>();

        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let store = &store;
            scope.spawn(move || {
                for (seq, walked) in job_rx.iter() {
                    let outcome = process_entry(store, &walked);
                    if result_tx.send((seq, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(result_tx);

        // Feed jobs lazily from the traversal; backpressure from the
        // bounded channel keeps memory independent of tree size.
        let mut seq = 0usize;
        for item in walk(source_root) {
            match item {
                Ok(entry) => {
                    if job_tx.send((seq, entry)).is_err() {
                        break;
                    }
                    seq += 1;
                }
                Err(skip) => match config.snapshot.unreadable {
                    UnreadablePolicy::Skip => {
                        tracing::warn!(path = %skip.path.display(), reason = %skip.reason, "skipping unreadable entry");
                        skipped.push(skip);
                    }
                    UnreadablePolicy::Fail => {
                        walk_failure = Some(SnapshotError::Unreadable {
                            path: skip.path,
                            reason: skip.reason,
                        });
                        break;
                    }
                },
            }
        }
        drop(job_tx);

        outcomes.resize_with(seq, || None);
        for (s, result) in result_rx.iter() {
            match result {
                Ok(outcome) => outcomes[s] = Some(outcome),
                Err(e) => {
                    // Keep the earliest failure in traversal order so
                    // repeated runs report the same culprit
                    if first_error.as_ref().map_or(true, |(fs, _)| s < *fs) {
                        first_error = Some((s, e));
                    }
                }
            }
        }
    });

    if let Some(failure) = walk_failure {
        return Err(failure);
    }
    if let Some((_, error)) = first_error {
        return Err(error);
    }

    // Fold results back into traversal order
    let mut builder = ManifestBuilder::new(config.duplicate_policy());
    let mut newly_stored: HashMap<ContentId, u64> = HashMap::new();
    let mut bytes_scanned = 0u64;
    let files_scanned = outcomes.len() as u64;

    for outcome in outcomes.into_iter().map(|o| o.expect("worker result")) {
        bytes_scanned += outcome.entry.size;
        if outcome.newly_stored {
            // Two workers racing on the same new content both report a
            // store; count each distinct object once
            newly_stored.insert(outcome.entry.id, outcome.entry.size);
        }
        builder.add(outcome.entry)?;
    }

    let manifest = builder.finish();
    let stats = PatchStats {
        files: manifest.len() as u64,
        new_objects: newly_stored.len() as u64,
        new_bytes: newly_stored.values().sum(),
        total_bytes: manifest.total_size(),
    };

    let record = index.commit(tag, &manifest, stats)?;

    let summary = SnapshotSummary {
        files_scanned,
        objects_stored: stats.new_objects,
        bytes_stored: stats.new_bytes,
        bytes_scanned,
        skipped,
    };

    tracing::info!(
        tag,
        files = summary.files_scanned,
        new_objects = summary.objects_stored,
        new_bytes = summary.bytes_stored,
        "snapshot committed"
    );

    Ok((record, summary))
}

/// Hash one traversal entry and store its content if unknown.
///
/// The unreadable policy applies at traversal time; an entry that was
/// visible then but fails to read here is a hard error for the run.
fn process_entry(store: &ObjectStore, walked: &WalkedEntry) -> Result<FileOutcome, SnapshotError> {
    match walked.kind {
        EntryKind::Symlink => {
            let target = std::fs::read_link(&walked.abs_path).map_err(|e| SnapshotError::Io {
                path: walked.abs_path.clone(),
                source: e,
            })?;
            let target_bytes = link_target_bytes(&target);
            let id = hash_bytes(&target_bytes);
            let newly_stored = !store.contains(id);
            store.put_bytes(id, &target_bytes)?;
            Ok(FileOutcome {
                entry: ManifestEntry::symlink(
                    walked.rel_path.clone(),
                    target_bytes.len() as u64,
                    id,
                ),
                newly_stored,
            })
        }
        EntryKind::File => {
            let id = hash_file(&walked.abs_path).map_err(|e| SnapshotError::Io {
                path: walked.abs_path.clone(),
                source: e,
            })?;

            let newly_stored = !store.contains(id);
            let written = store.put_file(id, &walked.abs_path)?;
            let size = if newly_stored {
                written
            } else {
                store.stored_size(id)?
            };

            Ok(FileOutcome {
                entry: ManifestEntry::file(walked.rel_path.clone(), walked.mode, size, id),
                newly_stored,
            })
        }
    }
}

#[cfg(unix)]
fn link_target_bytes(target: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    target.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn link_target_bytes(target: &Path) -> Vec<u8> {
    target.to_string_lossy().into_owned().into_bytes()
}
