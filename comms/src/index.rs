//! The file based channel through which a learner publishes checkpoints.
//!
//! Next to the uploaded artifacts lives an index file named [`INDEX_FILE`]:
//!
//! ```text
//! model_checkpoint_path: "<id>"
//! all_model_checkpoint_paths: "<id>"
//! ```
//!
//! Every artifact of a checkpoint shares the same id, the part of its file name
//! before the first `.` (`150.index`, `150.data-00000-of-00001`, ...).

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

/// Name of the index file inside a checkpoint directory.
pub const INDEX_FILE: &str = "checkpoint";

const LATEST_KEY: &str = "model_checkpoint_path";
const ALL_KEY: &str = "all_model_checkpoint_paths";

/// Tells apart the temporary files of writes running at the same time.
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Returns the checkpoint id an artifact file name belongs to.
pub fn checkpoint_id(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or_default()
}

/// The parsed content of a checkpoint index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointIndex {
    pub latest: String,
    pub all: Vec<String>,
}

impl CheckpointIndex {
    /// Creates an index that only knows about the checkpoint `id`.
    pub fn single(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            all: vec![id.clone()],
            latest: id,
        }
    }

    /// Renders the index in its on-disk format.
    pub fn render(&self) -> String {
        let mut lines = vec![format!("{LATEST_KEY}: \"{}\"", self.latest)];
        lines.extend(self.all.iter().map(|id| format!("{ALL_KEY}: \"{id}\"")));
        lines.join("\n")
    }

    /// Parses the on-disk format.
    ///
    /// # Errors
    /// `InvalidData` if a line is malformed or the latest id is missing.
    pub fn parse(text: &str) -> io::Result<Self> {
        let mut latest = None;
        let mut all = Vec::new();

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (key, value) = line.split_once(':').ok_or_else(|| invalid(line))?;
            let value = value
                .trim()
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .ok_or_else(|| invalid(line))?;

            match key.trim() {
                LATEST_KEY => latest = Some(value.to_string()),
                ALL_KEY => all.push(value.to_string()),
                _ => return Err(invalid(line)),
            }
        }

        match latest {
            Some(latest) if !latest.is_empty() => Ok(Self { latest, all }),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("index has no `{LATEST_KEY}` entry"),
            )),
        }
    }

    /// Reads the index inside `dir`.
    ///
    /// # Returns
    /// `Ok(None)` if no index has been published yet.
    pub fn read(dir: &Path) -> io::Result<Option<Self>> {
        match fs::read_to_string(dir.join(INDEX_FILE)) {
            Ok(text) => Self::parse(&text).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Writes the index inside `dir`.
    ///
    /// The content goes to a temporary file of its own first and is renamed
    /// over the index, so readers never observe a half written index and
    /// concurrent writers never share a temporary file.
    pub async fn write(&self, dir: &Path) -> io::Result<()> {
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!(".{INDEX_FILE}.{}.{seq}.tmp", std::process::id()));

        tokio::fs::write(&tmp, self.render()).await?;
        if let Err(e) = tokio::fs::rename(&tmp, dir.join(INDEX_FILE)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        Ok(())
    }

    /// Path prefix of the latest checkpoint's artifacts.
    pub fn latest_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.latest)
    }
}

fn invalid(line: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("malformed index line `{line}`"),
    )
}
