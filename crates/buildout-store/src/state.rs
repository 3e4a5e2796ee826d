//! The `.installed.cfg` state file.
//!
//! It uses the configuration grammar: `[buildout] parts` lists installed
//! parts in installation order, and each part has a section holding its
//! resolved options plus two reserved keys for the created paths and the
//! signature.

use crate::{fsync_dir, StoreError};
use buildout_config::{parse, EnvironmentFacts, Provenance, BUILDOUT_SECTION};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Reserved key holding the newline-separated paths a part created.
pub const INSTALLED_KEY: &str = "__buildout_installed__";
/// Reserved key holding a part's signature.
pub const SIGNATURE_KEY: &str = "__buildout_signature__";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledPartRecord {
    pub name: String,
    pub options: BTreeMap<String, String>,
    pub signature: String,
    pub paths: Vec<PathBuf>,
}

impl InstalledPartRecord {
    /// The recipe reference recorded at install time.
    pub fn recipe(&self) -> Option<&str> {
        self.options.get("recipe").map(String::as_str)
    }

    pub fn missing_paths(&self) -> Vec<&Path> {
        self.paths
            .iter()
            .filter(|p| p.symlink_metadata().is_err())
            .map(PathBuf::as_path)
            .collect()
    }
}

/// Every installed part, in installation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstalledState {
    parts: Vec<InstalledPartRecord>,
}

impl InstalledState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the state file at `path`. A missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let corrupt = |message: String| StoreError::CorruptState {
            path: path.to_path_buf(),
            message,
        };
        let data = parse(
            &text,
            &Provenance::File(path.to_path_buf()),
            &EnvironmentFacts::empty(),
        )?;

        let names: Vec<String> = data
            .get(BUILDOUT_SECTION, "parts")
            .map(|v| v.value.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default();

        let mut parts = Vec::with_capacity(names.len());
        for name in names {
            let section = data
                .section(&name)
                .ok_or_else(|| corrupt(format!("no section for installed part '{name}'")))?;
            let signature = section
                .get(SIGNATURE_KEY)
                .map(|v| v.value.clone())
                .ok_or_else(|| corrupt(format!("part '{name}' has no signature")))?;
            let paths = section
                .get(INSTALLED_KEY)
                .map(|v| {
                    v.value
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(PathBuf::from)
                        .collect()
                })
                .unwrap_or_default();
            let options = section
                .options
                .iter()
                .filter(|(k, _)| k.as_str() != SIGNATURE_KEY && k.as_str() != INSTALLED_KEY)
                .map(|(k, v)| (k.clone(), v.value.clone()))
                .collect();
            parts.push(InstalledPartRecord {
                name,
                options,
                signature,
                paths,
            });
        }
        debug!("loaded {} installed part(s) from {}", parts.len(), path.display());
        Ok(Self { parts })
    }

    /// Atomically replace the state file at `path`.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(self.render().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(dir)?;
        Ok(())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "[{BUILDOUT_SECTION}]");
        write_option(&mut out, "parts", &self.names().join("\n"));
        for record in &self.parts {
            let _ = writeln!(out, "\n[{}]", record.name);
            for (key, value) in &record.options {
                write_option(&mut out, key, value);
            }
            let paths: Vec<String> = record
                .paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            write_option(&mut out, INSTALLED_KEY, &paths.join("\n"));
            write_option(&mut out, SIGNATURE_KEY, &record.signature);
        }
        out
    }

    pub fn names(&self) -> Vec<String> {
        self.parts.iter().map(|p| p.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&InstalledPartRecord> {
        self.parts.iter().find(|p| p.name == name)
    }

    /// Replace the record with the same name, keeping its position, or
    /// append a new one.
    pub fn upsert(&mut self, record: InstalledPartRecord) {
        match self.parts.iter_mut().find(|p| p.name == record.name) {
            Some(existing) => *existing = record,
            None => self.parts.push(record),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<InstalledPartRecord> {
        let idx = self.parts.iter().position(|p| p.name == name)?;
        Some(self.parts.remove(idx))
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &InstalledPartRecord> {
        self.parts.iter()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

fn write_option(out: &mut String, key: &str, value: &str) {
    let mut lines = value.split('\n').filter(|l| !l.trim().is_empty());
    match lines.next() {
        Some(first) => {
            let _ = writeln!(out, "{key} = {}", first.trim());
        }
        None => {
            let _ = writeln!(out, "{key} =");
        }
    }
    for line in lines {
        let _ = writeln!(out, "    {}", line.trim());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, paths: &[&str]) -> InstalledPartRecord {
        let mut options = BTreeMap::new();
        options.insert("recipe".to_owned(), "buildout-recipes:mkdir".to_owned());
        options.insert("paths".to_owned(), "a\nb".to_owned());
        InstalledPartRecord {
            name: name.to_owned(),
            options,
            signature: format!("sig-{name}"),
            paths: paths.iter().map(PathBuf::from).collect(),
        }
    }

    #[test]
    fn missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = InstalledState::load(&dir.path().join(".installed.cfg")).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn save_and_load_preserve_order_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".installed.cfg");
        let mut state = InstalledState::new();
        state.upsert(record("zeta", &["/p/z1", "/p/z2"]));
        state.upsert(record("alpha", &[]));
        state.save(&path).unwrap();

        let loaded = InstalledState::load(&path).unwrap();
        assert_eq!(loaded.names(), vec!["zeta", "alpha"]);
        assert_eq!(loaded, state);
        assert_eq!(loaded.get("zeta").unwrap().recipe(), Some("buildout-recipes:mkdir"));
    }

    #[test]
    fn upsert_keeps_position() {
        let mut state = InstalledState::new();
        state.upsert(record("a", &[]));
        state.upsert(record("b", &[]));
        let mut changed = record("a", &["/x"]);
        changed.signature = "new".to_owned();
        state.upsert(changed);
        assert_eq!(state.names(), vec!["a", "b"]);
        assert_eq!(state.get("a").unwrap().signature, "new");
        assert!(state.remove("a").is_some());
        assert!(state.remove("a").is_none());
    }

    #[test]
    fn part_without_section_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".installed.cfg");
        fs::write(&path, "[buildout]\nparts = ghost\n").unwrap();
        assert!(matches!(
            InstalledState::load(&path),
            Err(StoreError::CorruptState { .. })
        ));
    }

    #[test]
    fn missing_paths_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("here");
        fs::write(&present, "").unwrap();
        let rec = InstalledPartRecord {
            paths: vec![present, dir.path().join("gone")],
            ..record("p", &[])
        };
        assert_eq!(rec.missing_paths(), vec![dir.path().join("gone").as_path()]);
    }
}
