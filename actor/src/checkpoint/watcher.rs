use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

use super::{CheckpointPointer, delete_artifacts, latest_checkpoint};
use crate::{
    error::{ActorErr, Result},
    policy::{Policy, RestoreErr},
};

/// Which checkpoint the policy currently runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    NoCheckpoint,
    Loaded(CheckpointPointer),
}

/// The outcome of one [`CheckpointWatcher::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    /// Nothing newer than what's loaded was published.
    NoNewCheckpoint,
    /// The policy now runs with this checkpoint.
    Loaded(CheckpointPointer),
    /// A newer checkpoint exists but can't be read yet, the next poll retries.
    TransientlyUnavailable(String),
}

/// Keeps a policy in sync with the checkpoints published in a directory.
///
/// Polled by the collector between horizons, never while an inference runs.
#[derive(Debug)]
pub struct CheckpointWatcher {
    dir: PathBuf,
    state: WatchState,
    retired: HashSet<String>,
}

impl CheckpointWatcher {
    /// Creates a new `CheckpointWatcher` over `dir`, nothing loaded yet.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            state: WatchState::NoCheckpoint,
            retired: HashSet::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state(&self) -> &WatchState {
        &self.state
    }

    /// The id of the loaded checkpoint, if any.
    pub fn loaded_id(&self) -> Option<&str> {
        match &self.state {
            WatchState::NoCheckpoint => None,
            WatchState::Loaded(pointer) => Some(&pointer.id),
        }
    }

    /// Loads the latest published checkpoint into `policy` if it's new.
    ///
    /// The loaded id only changes after a successful restore, and only then
    /// are the previous checkpoint's artifacts deleted. Ids that were loaded
    /// and replaced once are never loaded again.
    ///
    /// # Errors
    /// `Restore` if the checkpoint can never fit `policy`.
    pub fn poll<P: Policy + ?Sized>(&mut self, policy: &mut P) -> Result<Poll> {
        let latest = match latest_checkpoint(&self.dir) {
            Ok(Some(latest)) => latest,
            Ok(None) => return Ok(Poll::NoNewCheckpoint),
            Err(e) => {
                debug!("checkpoint index unreadable: {e}");
                return Ok(Poll::TransientlyUnavailable(e.to_string()));
            }
        };

        if self.loaded_id() == Some(latest.id.as_str()) || self.retired.contains(&latest.id) {
            return Ok(Poll::NoNewCheckpoint);
        }

        match policy.restore(&latest) {
            Ok(()) => {}
            Err(RestoreErr::Incomplete(detail)) => {
                warn!(id = latest.id.as_str(); "checkpoint not ready, retrying later: {detail}");
                return Ok(Poll::TransientlyUnavailable(detail));
            }
            Err(RestoreErr::Incompatible(detail)) => {
                return Err(ActorErr::Restore {
                    id: latest.id,
                    detail,
                });
            }
        }

        info!(id = latest.id.as_str(); "loaded checkpoint");

        let previous = std::mem::replace(&mut self.state, WatchState::Loaded(latest.clone()));
        if let WatchState::Loaded(previous) = previous {
            match delete_artifacts(&self.dir, &previous.id) {
                Ok(removed) => debug!(id = previous.id.as_str(), removed = removed; "deleted stale checkpoint"),
                Err(e) => warn!(id = previous.id.as_str(); "couldn't delete stale checkpoint: {e}"),
            }
            self.retired.insert(previous.id);
        }

        Ok(Poll::Loaded(latest))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use comms::index::CheckpointIndex;
    use ndarray::ArrayView2;

    use super::*;
    use crate::policy::Inference;

    /// Records restores, fails the ids it's told to.
    #[derive(Default)]
    struct Recorder {
        restored: Vec<String>,
        incomplete: Vec<&'static str>,
        incompatible: Vec<&'static str>,
    }

    impl Policy for Recorder {
        fn infer(&self, _: ArrayView2<'_, f32>) -> Result<Inference> {
            unreachable!()
        }

        fn restore(&mut self, checkpoint: &CheckpointPointer) -> std::result::Result<(), RestoreErr> {
            let id = checkpoint.id.as_str();
            if self.incomplete.iter().any(|i| *i == id) {
                return Err(RestoreErr::Incomplete("partial".into()));
            }
            if self.incompatible.iter().any(|i| *i == id) {
                return Err(RestoreErr::Incompatible("shape".into()));
            }
            self.restored.push(id.to_string());
            Ok(())
        }
    }

    fn publish(dir: &Path, id: &str) {
        fs::write(dir.join(format!("{id}.index")), b"x").unwrap();
        fs::write(dir.join("checkpoint"), CheckpointIndex::single(id).render()).unwrap();
    }

    #[test]
    fn nothing_published_is_no_new_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = CheckpointWatcher::new(dir.path());

        let poll = watcher.poll(&mut Recorder::default()).unwrap();
        assert_eq!(poll, Poll::NoNewCheckpoint);
        assert_eq!(watcher.state(), &WatchState::NoCheckpoint);
    }

    #[test]
    fn same_id_is_loaded_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = CheckpointWatcher::new(dir.path());
        let mut policy = Recorder::default();
        publish(dir.path(), "100");

        assert!(matches!(watcher.poll(&mut policy).unwrap(), Poll::Loaded(_)));
        assert_eq!(watcher.poll(&mut policy).unwrap(), Poll::NoNewCheckpoint);
        assert_eq!(policy.restored, vec!["100"]);
    }

    #[test]
    fn incomplete_checkpoint_keeps_the_loaded_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = CheckpointWatcher::new(dir.path());
        let mut policy = Recorder {
            incomplete: vec!["150"],
            ..Default::default()
        };

        publish(dir.path(), "100");
        watcher.poll(&mut policy).unwrap();
        publish(dir.path(), "150");

        let poll = watcher.poll(&mut policy).unwrap();
        assert!(matches!(poll, Poll::TransientlyUnavailable(_)));
        assert_eq!(watcher.loaded_id(), Some("100"));
        assert!(dir.path().join("100.index").exists());

        policy.incomplete.clear();
        let poll = watcher.poll(&mut policy).unwrap();
        assert!(matches!(poll, Poll::Loaded(ref p) if p.id == "150"));
        assert!(!dir.path().join("100.index").exists());
    }

    #[test]
    fn incompatible_checkpoint_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = CheckpointWatcher::new(dir.path());
        let mut policy = Recorder {
            incompatible: vec!["3"],
            ..Default::default()
        };
        publish(dir.path(), "3");

        let err = watcher.poll(&mut policy).unwrap_err();
        assert!(matches!(err, ActorErr::Restore { ref id, .. } if id == "3"));
        assert_eq!(watcher.state(), &WatchState::NoCheckpoint);
    }

    #[test]
    fn retired_id_is_never_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = CheckpointWatcher::new(dir.path());
        let mut policy = Recorder::default();

        publish(dir.path(), "a");
        watcher.poll(&mut policy).unwrap();
        publish(dir.path(), "b");
        watcher.poll(&mut policy).unwrap();
        publish(dir.path(), "a");

        assert_eq!(watcher.poll(&mut policy).unwrap(), Poll::NoNewCheckpoint);
        assert_eq!(watcher.loaded_id(), Some("b"));
        assert_eq!(policy.restored, vec!["a", "b"]);
    }

    #[test]
    fn corrupt_index_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("checkpoint"), "model_checkpoint_path: \"1").unwrap();

        let mut watcher = CheckpointWatcher::new(dir.path());
        let poll = watcher.poll(&mut Recorder::default()).unwrap();
        assert!(matches!(poll, Poll::TransientlyUnavailable(_)));
    }
}
