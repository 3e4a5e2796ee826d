use crate::layout::BuildoutLayout;
use crate::{fsync_dir, remove_path, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// A single step that undoes part of a recipe call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackStep {
    /// Remove a file, symlink or directory tree the recipe created.
    RemovePath(PathBuf),
}

/// The recipe call being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalAction {
    Install,
    Update,
    Uninstall,
}

impl std::fmt::Display for JournalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JournalAction::Install => write!(f, "install"),
            JournalAction::Update => write!(f, "update"),
            JournalAction::Uninstall => write!(f, "uninstall"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub op_id: String,
    pub action: JournalAction,
    pub part: String,
    pub timestamp: String,
    pub rollback_steps: Vec<RollbackStep>,
}

/// Write-ahead log of paths created by in-flight recipe calls.
///
/// The engine opens an entry before calling a recipe, appends a step for
/// every path the recipe reports as created, and commits the entry once the
/// part's record is persisted. Entries left behind by a killed process are
/// rolled back on the next run.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn new(layout: &BuildoutLayout) -> Self {
        Self {
            dir: layout.journal_dir(),
        }
    }

    /// Open an entry for `action` on `part`. Returns the op id.
    pub fn begin(&self, action: JournalAction, part: &str) -> Result<String, StoreError> {
        let now = chrono::Utc::now();
        let op_id = format!(
            "{}-{}",
            now.format("%Y%m%d%H%M%S%3f"),
            &blake3::hash(part.as_bytes()).to_hex()[..8]
        );
        let entry = JournalEntry {
            op_id: op_id.clone(),
            action,
            part: part.to_owned(),
            timestamp: now.to_rfc3339(),
            rollback_steps: Vec::new(),
        };
        self.write_entry(&entry)?;
        debug!("journal begin: {action} {part} (op_id={op_id})");
        Ok(op_id)
    }

    pub fn add_rollback_step(&self, op_id: &str, step: RollbackStep) -> Result<(), StoreError> {
        let mut entry = self.read_entry(op_id)?;
        entry.rollback_steps.push(step);
        self.write_entry(&entry)
    }

    /// Drop an entry after the operation completed.
    pub fn commit(&self, op_id: &str) -> Result<(), StoreError> {
        let path = self.entry_path(op_id);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("journal commit: {op_id}");
        }
        Ok(())
    }

    /// Incomplete entries, oldest first. Unreadable entries are discarded.
    pub fn list_incomplete(&self) -> Result<Vec<JournalEntry>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|c| serde_json::from_str::<JournalEntry>(&c).map_err(StoreError::from));
            match parsed {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!("discarding corrupt journal entry {}: {e}", path.display());
                    let _ = fs::remove_file(&path);
                }
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    /// Roll back every incomplete entry. Returns the entries undone.
    ///
    /// Steps for which `keep(entry, path)` holds are skipped; the engine uses
    /// this for paths already owned by a persisted part record.
    pub fn recover(
        &self,
        keep: impl Fn(&JournalEntry, &Path) -> bool,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        let entries = self.list_incomplete()?;
        for entry in &entries {
            info!(
                "rolling back interrupted {} of part {} (op_id={})",
                entry.action, entry.part, entry.op_id
            );
            Self::rollback_entry(entry, &keep);
            let _ = fs::remove_file(self.entry_path(&entry.op_id));
        }
        Ok(entries)
    }

    fn rollback_entry(entry: &JournalEntry, keep: &impl Fn(&JournalEntry, &Path) -> bool) {
        for step in entry.rollback_steps.iter().rev() {
            match step {
                RollbackStep::RemovePath(path) if keep(entry, path) => {
                    debug!("journal rollback: keeping {}", path.display());
                }
                RollbackStep::RemovePath(path) => match remove_path(path) {
                    Ok(true) => debug!("journal rollback: removed {}", path.display()),
                    Ok(false) => {}
                    Err(e) => warn!("journal rollback: failed to remove {}: {e}", path.display()),
                },
            }
        }
    }

    fn entry_path(&self, op_id: &str) -> PathBuf {
        self.dir.join(format!("{op_id}.json"))
    }

    fn write_entry(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(entry)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.entry_path(&entry.op_id))
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&self.dir)?;
        Ok(())
    }

    fn read_entry(&self, op_id: &str) -> Result<JournalEntry, StoreError> {
        let path = self.entry_path(op_id);
        if !path.exists() {
            return Err(StoreError::JournalEntryNotFound(op_id.to_owned()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Journal) {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(&BuildoutLayout::new(dir.path()));
        (dir, journal)
    }

    #[test]
    fn commit_removes_entry() {
        let (_dir, journal) = setup();
        let op_id = journal.begin(JournalAction::Install, "web").unwrap();
        let entries = journal.list_incomplete().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].part, "web");
        journal.commit(&op_id).unwrap();
        assert!(journal.list_incomplete().unwrap().is_empty());
    }

    #[test]
    fn recover_removes_created_paths_in_reverse() {
        let (dir, journal) = setup();
        let op_id = journal.begin(JournalAction::Install, "web").unwrap();
        let tree = dir.path().join("parts").join("web");
        fs::create_dir_all(&tree).unwrap();
        let file = tree.join("index.html");
        fs::write(&file, "x").unwrap();
        journal
            .add_rollback_step(&op_id, RollbackStep::RemovePath(tree.clone()))
            .unwrap();
        journal
            .add_rollback_step(&op_id, RollbackStep::RemovePath(file.clone()))
            .unwrap();

        let undone = journal.recover(|_, _| false).unwrap();
        assert_eq!(undone.len(), 1);
        assert_eq!(undone[0].rollback_steps.len(), 2);
        assert!(!tree.exists());
        assert!(journal.list_incomplete().unwrap().is_empty());
    }

    #[test]
    fn recover_keeps_protected_paths() {
        let (dir, journal) = setup();
        let op_id = journal.begin(JournalAction::Update, "web").unwrap();
        let kept = dir.path().join("kept");
        let dropped = dir.path().join("dropped");
        fs::write(&kept, "").unwrap();
        fs::write(&dropped, "").unwrap();
        for path in [&kept, &dropped] {
            journal
                .add_rollback_step(&op_id, RollbackStep::RemovePath(path.clone()))
                .unwrap();
        }
        journal.recover(|_, p| p == kept.as_path()).unwrap();
        assert!(kept.exists());
        assert!(!dropped.exists());
    }

    #[test]
    fn recover_discards_corrupt_entries() {
        let (dir, journal) = setup();
        let jdir = dir.path().join(".buildout-journal");
        fs::create_dir_all(&jdir).unwrap();
        fs::write(jdir.join("bad.json"), "{not json").unwrap();
        assert!(journal.recover(|_, _| false).unwrap().is_empty());
        assert!(!jdir.join("bad.json").exists());
    }

    #[test]
    fn unknown_op_id_is_reported() {
        let (_dir, journal) = setup();
        assert!(matches!(
            journal.add_rollback_step("nope", RollbackStep::RemovePath(PathBuf::from("/x"))),
            Err(StoreError::JournalEntryNotFound(_))
        ));
    }

    #[test]
    fn action_display() {
        assert_eq!(JournalAction::Install.to_string(), "install");
        assert_eq!(JournalAction::Uninstall.to_string(), "uninstall");
    }
}
