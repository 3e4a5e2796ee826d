//! One run per buildout directory, and cooperative Ctrl-C handling.
//!
//! The run lock is an advisory `flock` on `.buildout.lock` next to the
//! installed-state file. It only guards against a second `buildout` process;
//! nothing inside a run is shared across threads.

use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Held for the duration of [`Engine::apply`](crate::Engine::apply).
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock at `path`, or fail with [`CoreError::Locked`] if another
    /// run holds it. Never blocks.
    pub fn try_acquire(path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(CoreError::Locked {
                path: path.to_path_buf(),
            });
        }
        debug!("locked {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if self.file.unlock().is_ok() {
            debug!("unlocked {}", self.path.display());
        }
    }
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// First Ctrl-C: stop after the part being processed. Second: exit now and
/// leave the cleanup to the journal on the next run.
pub fn install_signal_handler() {
    let installed = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(1);
        }
        warn!("interrupt received, stopping after the current part");
    });
    if let Err(e) = installed {
        debug!("no Ctrl-C handler: {e}");
    }
}

pub fn shutdown_requested() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}
