//! Discovery and cleanup of the checkpoints a learner publishes on disk.

mod watcher;

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use comms::index::{CheckpointIndex, INDEX_FILE, checkpoint_id};

pub use watcher::{CheckpointWatcher, Poll, WatchState};

/// Where a published checkpoint lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointPointer {
    /// Opaque id, only ever compared for equality.
    pub id: String,
    /// Path prefix shared by every artifact of the checkpoint.
    pub path: PathBuf,
}

/// Resolves the latest checkpoint published in `dir`.
///
/// # Returns
/// `Ok(None)` if nothing has been published yet.
pub fn latest_checkpoint(dir: &Path) -> io::Result<Option<CheckpointPointer>> {
    Ok(CheckpointIndex::read(dir)?.map(|index| CheckpointPointer {
        path: index.latest_path(dir),
        id: index.latest,
    }))
}

/// Lists the artifacts of checkpoint `id` inside `dir`, the index excluded.
pub fn artifacts(dir: &Path, id: &str) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };

        if name != INDEX_FILE && checkpoint_id(name) == id && entry.file_type()?.is_file() {
            found.push(entry.path());
        }
    }

    found.sort();
    Ok(found)
}

/// Deletes every artifact of checkpoint `id` inside `dir`.
///
/// # Returns
/// How many files were removed.
pub fn delete_artifacts(dir: &Path, id: &str) -> io::Result<usize> {
    let files = artifacts(dir, id)?;

    for file in &files {
        fs::remove_file(file)?;
    }

    Ok(files.len())
}
