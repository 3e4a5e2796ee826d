use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const JOURNAL_DIR: &str = ".buildout-journal";
const LOCK_FILE: &str = ".buildout.lock";

/// Locations a buildout run reads and writes.
///
/// The defaults mirror the `[buildout]` defaults; the engine fills this in
/// from resolved configuration so user overrides are respected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildoutLayout {
    pub directory: PathBuf,
    pub parts_directory: PathBuf,
    pub bin_directory: PathBuf,
    pub eggs_directory: PathBuf,
    pub develop_eggs_directory: PathBuf,
    pub installed_file: PathBuf,
}

impl BuildoutLayout {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        Self {
            parts_directory: directory.join("parts"),
            bin_directory: directory.join("bin"),
            eggs_directory: directory.join("eggs"),
            develop_eggs_directory: directory.join("develop-eggs"),
            installed_file: directory.join(".installed.cfg"),
            directory,
        }
    }

    #[inline]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[inline]
    pub fn journal_dir(&self) -> PathBuf {
        self.directory.join(JOURNAL_DIR)
    }

    /// File locked for the duration of a run.
    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.directory.join(LOCK_FILE)
    }

    #[inline]
    pub fn part_dir(&self, part: &str) -> PathBuf {
        self.parts_directory.join(part)
    }

    /// The directories `bootstrap` creates, in creation order.
    pub fn standard_dirs(&self) -> [&Path; 4] {
        [
            &self.bin_directory,
            &self.parts_directory,
            &self.eggs_directory,
            &self.develop_eggs_directory,
        ]
    }

    /// Create the standard directories. Returns the ones that did not exist.
    pub fn initialize(&self) -> Result<Vec<PathBuf>, std::io::Error> {
        let mut created = Vec::new();
        for dir in self.standard_dirs() {
            if !dir.is_dir() {
                fs::create_dir_all(dir)?;
                debug!("created {}", dir.display());
                created.push(dir.to_path_buf());
            }
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths() {
        let layout = BuildoutLayout::new("/proj");
        assert_eq!(layout.parts_directory, PathBuf::from("/proj/parts"));
        assert_eq!(layout.installed_file, PathBuf::from("/proj/.installed.cfg"));
        assert_eq!(layout.journal_dir(), PathBuf::from("/proj/.buildout-journal"));
        assert_eq!(layout.part_dir("web"), PathBuf::from("/proj/parts/web"));
        assert_eq!(layout.lock_file(), PathBuf::from("/proj/.buildout.lock"));
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = BuildoutLayout::new(dir.path());
        assert_eq!(layout.initialize().unwrap().len(), 4);
        assert!(layout.bin_directory.is_dir());
        assert!(layout.initialize().unwrap().is_empty());
    }
}
