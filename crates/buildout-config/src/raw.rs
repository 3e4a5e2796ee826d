//! Unresolved configuration data with provenance.
//!
//! `RawConfigData` is what the parser produces for one file and what the
//! loader hands to the resolver after merging a whole `extends` chain.
//! Values are plain strings; `${...}` tokens are left untouched here.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Where a value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Provenance {
    File(PathBuf),
    Default,
    Override,
    Computed,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::File(path) => write!(f, "{}", path.display()),
            Provenance::Default => f.write_str("DEFAULT_VALUE"),
            Provenance::Override => f.write_str("COMMAND_LINE_VALUE"),
            Provenance::Computed => f.write_str("COMPUTED_VALUE"),
        }
    }
}

/// How a line in a configuration file touched an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EditOp {
    Assign,
    Append,
    Remove,
}

impl fmt::Display for EditOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditOp::Assign => f.write_str("="),
            EditOp::Append => f.write_str("+="),
            EditOp::Remove => f.write_str("-="),
        }
    }
}

/// One contribution to an option's final value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    pub op: EditOp,
    pub origin: Provenance,
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            EditOp::Assign => write!(f, "{}", self.origin),
            op => write!(f, "{op} {}", self.origin),
        }
    }
}

/// An option value plus the chain of edits that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawValue {
    pub value: String,
    pub origin: Provenance,
    pub history: Vec<Annotation>,
}

impl RawValue {
    pub fn new(value: impl Into<String>, origin: Provenance) -> Self {
        Self {
            value: value.into(),
            history: vec![Annotation {
                op: EditOp::Assign,
                origin: origin.clone(),
            }],
            origin,
        }
    }

    fn implicit(origin: &Provenance) -> Self {
        Self {
            value: String::new(),
            origin: origin.clone(),
            history: Vec::new(),
        }
    }

    fn record(&mut self, op: EditOp, origin: &Provenance) {
        self.origin = origin.clone();
        self.history.push(Annotation {
            op,
            origin: origin.clone(),
        });
    }
}

/// Pending `+=` / `-=` operands for one option, not yet applied to a base.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingEdit {
    pub append: Option<(String, Provenance)>,
    pub remove: Option<(String, Provenance)>,
}

impl PendingEdit {
    pub fn push(&mut self, op: EditOp, value: &str, origin: &Provenance) {
        let slot = match op {
            EditOp::Append => &mut self.append,
            EditOp::Remove => &mut self.remove,
            EditOp::Assign => return,
        };
        match slot {
            Some((existing, prov)) => {
                *existing = join_lines(existing, value);
                *prov = origin.clone();
            }
            None => *slot = Some((value.to_owned(), origin.clone())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSection {
    pub options: BTreeMap<String, RawValue>,
    pub edits: BTreeMap<String, PendingEdit>,
}

impl RawSection {
    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.options.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: RawValue) {
        self.options.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty() && self.edits.is_empty()
    }

    /// Overlay `overlay` onto `self`, returning the combined section.
    ///
    /// Plain keys in `overlay` replace keys in `self`. Edit operators take
    /// their base from `overlay`'s own plain key when present, else from
    /// `self`, else from the empty string; appends run before removals.
    pub fn overlaid_with(&self, overlay: &RawSection) -> RawSection {
        let mut options = self.options.clone();
        let mut own = overlay.options.clone();

        for (key, edit) in &overlay.edits {
            let origin = edit
                .append
                .as_ref()
                .or(edit.remove.as_ref())
                .map_or(Provenance::Computed, |(_, p)| p.clone());
            let mut value = own
                .get(key)
                .or_else(|| self.options.get(key))
                .cloned()
                .unwrap_or_else(|| RawValue::implicit(&origin));

            if let Some((operand, prov)) = &edit.append {
                value.value = join_lines(&value.value, operand);
                value.record(EditOp::Append, prov);
            }
            if let Some((operand, prov)) = &edit.remove {
                value.value = remove_lines(&value.value, operand);
                value.record(EditOp::Remove, prov);
            }
            own.insert(key.clone(), value);
        }

        options.extend(own);
        RawSection {
            options,
            edits: BTreeMap::new(),
        }
    }
}

/// Section name → options, as produced by the parser or the loader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConfigData {
    sections: BTreeMap<String, RawSection>,
}

impl RawConfigData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(&self, name: &str) -> Option<&RawSection> {
        self.sections.get(name)
    }

    pub fn section_mut(&mut self, name: &str) -> &mut RawSection {
        self.sections.entry(name.to_owned()).or_default()
    }

    pub fn sections(&self) -> impl Iterator<Item = (&String, &RawSection)> {
        self.sections.iter()
    }

    pub fn section_names(&self) -> Vec<String> {
        self.sections.keys().cloned().collect()
    }

    pub fn contains_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    pub fn get(&self, section: &str, option: &str) -> Option<&RawValue> {
        self.sections.get(section).and_then(|s| s.get(option))
    }

    pub fn set(&mut self, section: &str, option: &str, value: RawValue) {
        self.section_mut(section).insert(option, value);
    }

    /// Remove and return a plain option, e.g. `buildout:extends` after it
    /// has been followed.
    pub fn take(&mut self, section: &str, option: &str) -> Option<RawValue> {
        self.sections
            .get_mut(section)
            .and_then(|s| s.options.remove(option))
    }

    /// Merge `overlay` on top of `self`. Sections only in `self` are kept
    /// as they are; sections in `overlay` are combined key by key.
    #[must_use]
    pub fn merged_with(&self, overlay: &RawConfigData) -> RawConfigData {
        let mut sections = self.sections.clone();
        for (name, over) in &overlay.sections {
            let merged = match self.sections.get(name) {
                Some(base) => base.overlaid_with(over),
                None => RawSection::default().overlaid_with(over),
            };
            sections.insert(name.clone(), merged);
        }
        RawConfigData { sections }
    }

    /// Whether any `+=` / `-=` operand is still waiting for a base value.
    pub fn has_pending_edits(&self) -> bool {
        self.sections.values().any(|s| !s.edits.is_empty())
    }
}

/// Join two newline-separated line lists, base lines first.
pub fn join_lines(base: &str, added: &str) -> String {
    let mut lines: Vec<&str> = base.split('\n').filter(|l| !l.trim().is_empty()).collect();
    lines.extend(added.split('\n').filter(|l| !l.trim().is_empty()));
    lines.join("\n")
}

/// Drop every line of `base` that appears (trimmed) in `removed`.
pub fn remove_lines(base: &str, removed: &str) -> String {
    let drop: Vec<&str> = removed.split('\n').map(str::trim).collect();
    base.split('\n')
        .filter(|l| !l.trim().is_empty() && !drop.contains(&l.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}
