use buildout_store::remove_path;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Paths created during one recipe attempt.
///
/// Dropping the guard while it is still armed removes every registered path
/// in reverse order, so an early return or a panic inside the recipe cannot
/// leave half-built artifacts behind. [`CreatedPaths::disarm`] keeps them.
#[derive(Debug, Default)]
pub struct CreatedPaths {
    paths: Vec<PathBuf>,
    armed: bool,
}

impl CreatedPaths {
    pub fn new() -> Self {
        Self {
            paths: Vec::new(),
            armed: true,
        }
    }

    pub fn register(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Keep everything; returns the registered paths.
    pub fn disarm(mut self) -> Vec<PathBuf> {
        self.armed = false;
        std::mem::take(&mut self.paths)
    }

    /// Remove every registered path now.
    pub fn rollback(mut self) {
        self.remove_all();
    }

    fn remove_all(&mut self) {
        self.armed = false;
        for path in self.paths.drain(..).rev() {
            match remove_path(&path) {
                Ok(true) => debug!("rolled back {}", path.display()),
                Ok(false) => {}
                Err(e) => warn!("failed to remove {} during rollback: {e}", path.display()),
            }
        }
    }
}

impl Drop for CreatedPaths {
    fn drop(&mut self) {
        if self.armed {
            self.remove_all();
        }
    }
}
