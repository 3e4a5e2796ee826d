//! Persistent state for buildout runs.
//!
//! `InstalledState` reads and atomically rewrites the `.installed.cfg` file
//! that records every installed part, `BuildoutLayout` knows where the
//! standard directories live, and `Journal` is a write-ahead log of paths
//! created by in-flight recipe calls so an interrupted run can be cleaned up.

pub mod journal;
pub mod layout;
pub mod state;

pub use journal::{Journal, JournalAction, JournalEntry, RollbackStep};
pub use layout::BuildoutLayout;
pub use state::{InstalledPartRecord, InstalledState, INSTALLED_KEY, SIGNATURE_KEY};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Remove a file, symlink or directory tree. Returns whether anything was
/// removed.
pub fn remove_path(path: &Path) -> Result<bool, std::io::Error> {
    let Ok(meta) = path.symlink_metadata() else {
        return Ok(false);
    };
    if meta.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else {
        std::fs::remove_file(path)?;
    }
    Ok(true)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unreadable state file: {0}")]
    StateSyntax(#[from] buildout_config::ConfigError),
    #[error("corrupt state file {}: {message}", path.display())]
    CorruptState { path: PathBuf, message: String },
    #[error("journal entry not found: {0}")]
    JournalEntryNotFound(String),
}
