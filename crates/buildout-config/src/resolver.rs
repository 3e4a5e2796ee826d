//! Lazy, memoized resolution of `${section:option}` references.
//!
//! Sections live in an arena indexed by [`SectionId`]. Every option carries a
//! [`Resolution`] state; the walk marks an option `Resolving` while its
//! template is being expanded, so meeting that marker again is a cycle.
//! The walk keeps its own frame stack instead of recursing, which keeps deep
//! reference chains off the call stack.

use crate::loader::BUILDOUT_SECTION;
use crate::raw::{Annotation, EditOp, Provenance, RawConfigData, RawValue};
use crate::section::Section;
use crate::{ConfigError, MACRO_OPTION, SECTION_NAME_OPTION};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Unresolved,
    Resolving,
    Resolved(String),
}

#[derive(Debug)]
struct Slot {
    raw: RawValue,
    state: Resolution,
}

#[derive(Debug)]
struct SectionData {
    name: String,
    expanded: bool,
    slots: BTreeMap<String, Slot>,
    runtime: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Text(String),
    Ref { section: String, option: String },
}

struct Frame {
    section: SectionId,
    option: String,
    pieces: Vec<Piece>,
    next: usize,
    out: String,
}

enum Lookup {
    Value(String),
    Pending(String),
    Resolving,
    Missing,
}

#[derive(Debug)]
struct Arena {
    raw: RawConfigData,
    sections: Vec<SectionData>,
    index: HashMap<String, SectionId>,
    references: BTreeMap<SectionId, BTreeSet<SectionId>>,
}

impl Arena {
    fn new(raw: RawConfigData) -> Self {
        let raw = if raw.has_pending_edits() {
            RawConfigData::new().merged_with(&raw)
        } else {
            raw
        };
        let mut arena = Self {
            raw,
            sections: Vec::new(),
            index: HashMap::new(),
            references: BTreeMap::new(),
        };
        for name in arena.raw.section_names() {
            arena.insert_section(&name);
        }
        arena
    }

    fn insert_section(&mut self, name: &str) -> SectionId {
        if let Some(id) = self.index.get(name) {
            return *id;
        }
        let id = SectionId(self.sections.len());
        self.sections.push(SectionData {
            name: name.to_owned(),
            expanded: false,
            slots: BTreeMap::new(),
            runtime: BTreeMap::new(),
        });
        self.index.insert(name.to_owned(), id);
        id
    }

    fn lookup(&self, name: &str) -> Result<SectionId, ConfigError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::MissingSection(name.to_owned()))
    }

    fn data(&self, id: SectionId) -> &SectionData {
        &self.sections[id.0]
    }

    fn expand(&mut self, id: SectionId) -> Result<(), ConfigError> {
        if self.sections[id.0].expanded {
            return Ok(());
        }
        let name = self.sections[id.0].name.clone();
        let options = if self.raw.contains_section(&name) {
            expand_macros(&self.raw, &name, &mut Vec::new())?
        } else {
            BTreeMap::new()
        };
        let data = &mut self.sections[id.0];
        data.slots = options
            .into_iter()
            .map(|(key, raw)| {
                (
                    key,
                    Slot {
                        raw,
                        state: Resolution::Unresolved,
                    },
                )
            })
            .collect();
        data.expanded = true;
        Ok(())
    }

    fn peek(&mut self, id: SectionId, option: &str) -> Result<Lookup, ConfigError> {
        if option == SECTION_NAME_OPTION {
            return Ok(Lookup::Value(self.data(id).name.clone()));
        }
        self.expand(id)?;
        let data = self.data(id);
        if let Some(value) = data.runtime.get(option) {
            return Ok(Lookup::Value(value.clone()));
        }
        Ok(match data.slots.get(option) {
            None => Lookup::Missing,
            Some(slot) => match &slot.state {
                Resolution::Resolved(v) => Lookup::Value(v.clone()),
                Resolution::Resolving => Lookup::Resolving,
                Resolution::Unresolved => Lookup::Pending(slot.raw.value.clone()),
            },
        })
    }

    fn set_state(&mut self, id: SectionId, option: &str, state: Resolution) {
        if let Some(slot) = self.sections[id.0].slots.get_mut(option) {
            slot.state = state;
        }
    }

    fn resolve(&mut self, id: SectionId, option: &str) -> Result<Option<String>, ConfigError> {
        match self.peek(id, option)? {
            Lookup::Value(v) => Ok(Some(v)),
            Lookup::Missing => Ok(None),
            Lookup::Resolving => Err(ConfigError::CircularReference {
                chain: format!("{}:{option}", self.data(id).name),
            }),
            Lookup::Pending(raw) => self.walk(id, option, &raw).map(Some),
        }
    }

    fn walk(&mut self, id: SectionId, option: &str, raw: &str) -> Result<String, ConfigError> {
        let pieces = split_template(raw)?;
        self.set_state(id, option, Resolution::Resolving);
        let mut stack = vec![Frame {
            section: id,
            option: option.to_owned(),
            pieces,
            next: 0,
            out: String::new(),
        }];
        let result = self.drive(&mut stack);
        if result.is_err() {
            for frame in &stack {
                self.set_state(frame.section, &frame.option, Resolution::Unresolved);
            }
        }
        result
    }

    fn drive(&mut self, stack: &mut Vec<Frame>) -> Result<String, ConfigError> {
        let mut result = String::new();
        while let Some(frame) = stack.last_mut() {
            let Some(piece) = frame.pieces.get(frame.next) else {
                let value = std::mem::take(&mut frame.out);
                let section = frame.section;
                let option = std::mem::take(&mut frame.option);
                stack.pop();
                trace!("resolved {}:{option}", self.data(section).name);
                self.set_state(section, &option, Resolution::Resolved(value.clone()));
                match stack.last_mut() {
                    Some(parent) => {
                        parent.out.push_str(&value);
                        parent.next += 1;
                    }
                    None => result = value,
                }
                continue;
            };

            match piece {
                Piece::Text(text) => {
                    frame.out.push_str(text);
                    frame.next += 1;
                }
                Piece::Ref { section, option } => {
                    let from = frame.section;
                    let target = if section.is_empty() {
                        from
                    } else {
                        self.lookup(section)?
                    };
                    let option = option.clone();
                    if target != from {
                        self.references.entry(from).or_default().insert(target);
                    }
                    match self.peek(target, &option)? {
                        Lookup::Value(v) => {
                            frame.out.push_str(&v);
                            frame.next += 1;
                        }
                        Lookup::Missing => {
                            return Err(ConfigError::MissingOption {
                                section: self.data(target).name.clone(),
                                option,
                            })
                        }
                        Lookup::Resolving => {
                            return Err(ConfigError::CircularReference {
                                chain: self.cycle_chain(stack, target, &option),
                            })
                        }
                        Lookup::Pending(raw) => {
                            let pieces = split_template(&raw)?;
                            self.set_state(target, &option, Resolution::Resolving);
                            stack.push(Frame {
                                section: target,
                                option,
                                pieces,
                                next: 0,
                                out: String::new(),
                            });
                        }
                    }
                }
            }
        }
        Ok(result)
    }

    fn cycle_chain(&self, stack: &[Frame], target: SectionId, option: &str) -> String {
        let start = stack
            .iter()
            .position(|f| f.section == target && f.option == option)
            .unwrap_or(0);
        let mut chain: Vec<String> = stack[start..]
            .iter()
            .map(|f| format!("{}:{}", self.data(f.section).name, f.option))
            .collect();
        chain.push(format!("{}:{option}", self.data(target).name));
        chain.join(" -> ")
    }
}

/// Inline the raw options of every section named by `<`, recursively, then
/// apply the section's own options on top.
fn expand_macros(
    raw: &RawConfigData,
    name: &str,
    doing: &mut Vec<String>,
) -> Result<BTreeMap<String, RawValue>, ConfigError> {
    let own = raw
        .section(name)
        .ok_or_else(|| ConfigError::MissingSection(name.to_owned()))?
        .options
        .clone();
    if name == BUILDOUT_SECTION {
        return Ok(own);
    }
    let Some(macros) = own.get(MACRO_OPTION) else {
        return Ok(own);
    };
    if doing.iter().any(|d| d == name) {
        doing.push(name.to_owned());
        return Err(ConfigError::MacroLoop {
            chain: doing.join(" -> "),
        });
    }
    doing.push(name.to_owned());

    let mut result = BTreeMap::new();
    for base in macros.value.split_whitespace() {
        result.extend(expand_macros(raw, base, doing)?);
    }
    doing.pop();

    result.extend(own);
    result.remove(MACRO_OPTION);
    Ok(result)
}

fn valid_name(name: &str, allow_empty: bool) -> bool {
    (allow_empty || !name.is_empty())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | ' ' | '.' | '_'))
}

fn split_template(value: &str) -> Result<Vec<Piece>, ConfigError> {
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut rest = value;

    while let Some(pos) = rest.find('$') {
        text.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(tail) = after.strip_prefix('$') {
            text.push('$');
            rest = tail;
        } else if let Some(tail) = after.strip_prefix('{') {
            let Some(end) = tail.find('}') else {
                return Err(ConfigError::BadSubstitution {
                    text: rest[pos..].to_owned(),
                    reason: "unterminated '${'".to_owned(),
                });
            };
            let inner = &tail[..end];
            let bad = |reason: &str| ConfigError::BadSubstitution {
                text: format!("${{{inner}}}"),
                reason: reason.to_owned(),
            };
            let (section, option) = inner
                .split_once(':')
                .ok_or_else(|| bad("expected ${section:option}"))?;
            if !valid_name(section, true) || !valid_name(option, false) {
                return Err(bad("invalid characters in reference"));
            }
            if !text.is_empty() {
                pieces.push(Piece::Text(std::mem::take(&mut text)));
            }
            pieces.push(Piece::Ref {
                section: section.to_owned(),
                option: option.to_owned(),
            });
            rest = &tail[end + 1..];
        } else {
            text.push('$');
            rest = after;
        }
    }
    text.push_str(rest);
    if !text.is_empty() {
        pieces.push(Piece::Text(text));
    }
    Ok(pieces)
}

/// The resolved view over a run's merged configuration.
///
/// Values are computed on first access and cached for the rest of the run.
/// Interior mutability keeps the [`Section`] handles cheap to copy around;
/// the resolver is not `Sync` and is meant for a single thread.
#[derive(Debug)]
pub struct ConfigResolver {
    arena: RefCell<Arena>,
}

impl ConfigResolver {
    pub fn new(data: RawConfigData) -> Self {
        Self {
            arena: RefCell::new(Arena::new(data)),
        }
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.arena.borrow().index.contains_key(name)
    }

    pub fn section_names(&self) -> Vec<String> {
        self.arena
            .borrow()
            .sections
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn section(&self, name: &str) -> Result<Section<'_>, ConfigError> {
        let id = self.arena.borrow().lookup(name)?;
        Ok(Section::new(self, id))
    }

    /// Return the named section, creating an empty one when it is absent.
    pub fn section_or_insert(&self, name: &str) -> Section<'_> {
        let id = self.arena.borrow_mut().insert_section(name);
        Section::new(self, id)
    }

    pub fn buildout(&self) -> Result<Section<'_>, ConfigError> {
        self.section(BUILDOUT_SECTION)
    }

    /// Resolve `section:option`. Absent options yield `None`.
    pub fn get(&self, section: &str, option: &str) -> Result<Option<String>, ConfigError> {
        let mut arena = self.arena.borrow_mut();
        let id = arena.lookup(section)?;
        arena.resolve(id, option)
    }

    /// Resolve an arbitrary template string in the context of `section`.
    pub fn substitute(&self, section: &str, template: &str) -> Result<String, ConfigError> {
        let mut arena = self.arena.borrow_mut();
        let id = arena.lookup(section)?;
        let key = format!("\0template:{template}");
        arena.expand(id)?;
        arena.sections[id.0].slots.insert(
            key.clone(),
            Slot {
                raw: RawValue::new(template, Provenance::Computed),
                state: Resolution::Unresolved,
            },
        );
        let result = arena.walk(id, &key, template);
        arena.sections[id.0].slots.remove(&key);
        result
    }

    pub(crate) fn name_of(&self, id: SectionId) -> String {
        self.arena.borrow().data(id).name.clone()
    }

    pub(crate) fn resolve_id(
        &self,
        id: SectionId,
        option: &str,
    ) -> Result<Option<String>, ConfigError> {
        self.arena.borrow_mut().resolve(id, option)
    }

    pub(crate) fn set_runtime(&self, id: SectionId, option: &str, value: String) {
        self.arena.borrow_mut().sections[id.0]
            .runtime
            .insert(option.to_owned(), value);
    }

    pub(crate) fn keys_of(&self, id: SectionId) -> Result<Vec<String>, ConfigError> {
        let mut arena = self.arena.borrow_mut();
        arena.expand(id)?;
        let data = arena.data(id);
        let mut keys: BTreeSet<String> = data.slots.keys().cloned().collect();
        keys.extend(data.runtime.keys().cloned());
        Ok(keys.into_iter().collect())
    }

    pub(crate) fn history_of(
        &self,
        id: SectionId,
        option: &str,
    ) -> Result<Vec<Annotation>, ConfigError> {
        let mut arena = self.arena.borrow_mut();
        arena.expand(id)?;
        let data = arena.data(id);
        if data.runtime.contains_key(option) {
            return Ok(vec![Annotation {
                op: EditOp::Assign,
                origin: Provenance::Computed,
            }]);
        }
        Ok(data
            .slots
            .get(option)
            .map(|slot| slot.raw.history.clone())
            .unwrap_or_default())
    }

    pub(crate) fn references_of(&self, id: SectionId) -> Vec<String> {
        let arena = self.arena.borrow();
        arena
            .references
            .get(&id)
            .map(|targets| targets.iter().map(|t| arena.data(*t).name.clone()).collect())
            .unwrap_or_default()
    }
}
