//! Multi-file loading: built-in defaults, user defaults, the `extends` chain
//! of the main file, and command-line assignments, in increasing priority.

use crate::condition::EnvironmentFacts;
use crate::parser::parse;
use crate::raw::{EditOp, Provenance, RawConfigData, RawValue};
use crate::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Name of the section that holds tool-wide settings.
pub const BUILDOUT_SECTION: &str = "buildout";

const DEFAULTS: &[(&str, &str)] = &[
    ("parts", ""),
    ("parts-directory", "${buildout:directory}/parts"),
    ("bin-directory", "${buildout:directory}/bin"),
    ("eggs-directory", "${buildout:directory}/eggs"),
    ("develop-eggs-directory", "${buildout:directory}/develop-eggs"),
    ("installed", "${buildout:directory}/.installed.cfg"),
    ("develop", ""),
    ("find-links", ""),
    ("offline", "false"),
    ("newest", "true"),
    ("prefer-final", "true"),
    ("allow-picked-versions", "true"),
    ("show-picked-versions", "false"),
    ("use-dependency-links", "true"),
    ("versions", "versions"),
];

/// A `section:option=value` assignment given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub section: String,
    pub option: String,
    pub op: EditOp,
    pub value: String,
}

impl FromStr for Override {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidOverride(s.to_owned());
        let (target, value) = s.split_once('=').ok_or_else(invalid)?;
        let (target, op) = if let Some(t) = target.strip_suffix('+') {
            (t, EditOp::Append)
        } else if let Some(t) = target.strip_suffix('-') {
            (t, EditOp::Remove)
        } else {
            (target, EditOp::Assign)
        };
        let (section, option) = match target.split_once(':') {
            Some((sec, opt)) => (sec.trim(), opt.trim()),
            None => (BUILDOUT_SECTION, target.trim()),
        };
        if section.is_empty() || option.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            section: section.to_owned(),
            option: option.to_owned(),
            op,
            value: value.trim().to_owned(),
        })
    }
}

/// Builds the merged [`RawConfigData`] for a run.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    facts: EnvironmentFacts,
    user_defaults: Option<PathBuf>,
    overrides: Vec<Override>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_facts(mut self, facts: EnvironmentFacts) -> Self {
        self.facts = facts;
        self
    }

    /// Use `path` as the user defaults file. Missing files are ignored.
    #[must_use]
    pub fn with_user_defaults(mut self, path: Option<PathBuf>) -> Self {
        self.user_defaults = path;
        self
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: Vec<Override>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn facts(&self) -> &EnvironmentFacts {
        &self.facts
    }

    /// Load `config_path` and everything layered around it.
    pub fn load(&self, config_path: &Path) -> Result<RawConfigData, ConfigError> {
        let config_path = absolute(config_path)?;
        let directory = config_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let mut underlay = Some(builtin_defaults(&directory));

        if let Some(user) = &self.user_defaults {
            if user.is_file() {
                debug!("loading user defaults from {}", user.display());
                let mut chain = Vec::new();
                let loaded = self.load_file(user, &mut underlay, &mut chain)?;
                underlay = Some(loaded);
            }
        }

        let mut chain = Vec::new();
        let mut data = self.load_file(&config_path, &mut underlay, &mut chain)?;

        if !self.overrides.is_empty() {
            data = data.merged_with(&overrides_data(&self.overrides));
        }
        Ok(data)
    }

    /// Parse text that is not backed by a file, e.g. for tests or `init`.
    pub fn load_str(&self, text: &str, directory: &Path) -> Result<RawConfigData, ConfigError> {
        let origin = Provenance::File(directory.join("<string>"));
        let own = parse(text, &origin, &self.facts)?;
        let mut data = builtin_defaults(directory).merged_with(&own);
        if !self.overrides.is_empty() {
            data = data.merged_with(&overrides_data(&self.overrides));
        }
        Ok(data)
    }

    fn load_file(
        &self,
        path: &Path,
        underlay: &mut Option<RawConfigData>,
        chain: &mut Vec<PathBuf>,
    ) -> Result<RawConfigData, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
                chain: format_chain(chain),
            });
        }
        let canonical = fs::canonicalize(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if chain.contains(&canonical) {
            chain.push(canonical);
            return Err(ConfigError::RecursiveInclude {
                chain: format_chain(chain),
            });
        }
        chain.push(canonical.clone());

        let text = fs::read_to_string(&canonical).map_err(|source| ConfigError::Read {
            path: canonical.clone(),
            source,
        })?;
        let mut own = parse(&text, &Provenance::File(path.to_path_buf()), &self.facts)?;
        let extends = own.take(BUILDOUT_SECTION, "extends");
        let base_dir = canonical
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let references: Vec<PathBuf> = extends
            .map(|v| {
                v.value
                    .split_whitespace()
                    .map(|r| base_dir.join(expand_tilde(r)))
                    .collect()
            })
            .unwrap_or_default();

        // Later branches load on top of the accumulated result, which is the
        // base their `+=`/`-=` edits apply to.
        let result = if references.is_empty() {
            underlay.take().unwrap_or_default().merged_with(&own)
        } else {
            let mut acc: Option<RawConfigData> = None;
            for reference in &references {
                debug!("{} extends {}", path.display(), reference.display());
                let loaded = match acc.take() {
                    Some(prev) => self.load_file(reference, &mut Some(prev), chain)?,
                    None => self.load_file(reference, underlay, chain)?,
                };
                acc = Some(loaded);
            }
            acc.unwrap_or_default().merged_with(&own)
        };

        chain.pop();
        Ok(result)
    }
}

fn builtin_defaults(directory: &Path) -> RawConfigData {
    let mut data = RawConfigData::new();
    data.set(
        BUILDOUT_SECTION,
        "directory",
        RawValue::new(directory.to_string_lossy(), Provenance::Computed),
    );
    for (key, value) in DEFAULTS {
        data.set(BUILDOUT_SECTION, key, RawValue::new(*value, Provenance::Default));
    }
    data
}

fn overrides_data(overrides: &[Override]) -> RawConfigData {
    let mut data = RawConfigData::new();
    for o in overrides {
        let section = data.section_mut(&o.section);
        match o.op {
            EditOp::Assign => {
                section.insert(o.option.clone(), RawValue::new(&o.value, Provenance::Override));
            }
            op => section
                .edits
                .entry(o.option.clone())
                .or_default()
                .push(op, &o.value, &Provenance::Override),
        }
    }
    data
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path))
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

/// `$BUILDOUT_HOME/default.cfg`, else `~/.buildout/default.cfg`.
pub fn default_user_defaults_path() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("BUILDOUT_HOME") {
        return Some(PathBuf::from(home).join("default.cfg"));
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".buildout").join("default.cfg"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overrides() {
        let o: Override = "a:b=c".parse().unwrap();
        assert_eq!(o.section, "a");
        assert_eq!(o.option, "b");
        assert_eq!(o.op, EditOp::Assign);
        assert_eq!(o.value, "c");

        let o: Override = "buildout:parts+=x".parse().unwrap();
        assert_eq!(o.option, "parts");
        assert_eq!(o.op, EditOp::Append);

        let o: Override = "offline=true".parse().unwrap();
        assert_eq!(o.section, "buildout");
        assert_eq!(o.option, "offline");
    }

    #[test]
    fn rejects_malformed_overrides() {
        assert!("no-equals".parse::<Override>().is_err());
        assert!(":x=1".parse::<Override>().is_err());
        assert!("s:=1".parse::<Override>().is_err());
    }

    #[test]
    fn defaults_are_annotated() {
        let data = builtin_defaults(Path::new("/project"));
        let dir = data.get("buildout", "directory").unwrap();
        assert_eq!(dir.value, "/project");
        assert_eq!(dir.origin, Provenance::Computed);
        assert_eq!(
            data.get("buildout", "prefer-final").unwrap().origin,
            Provenance::Default
        );
    }

    #[test]
    fn load_str_applies_overrides_last() {
        let loader = ConfigLoader::new()
            .with_facts(EnvironmentFacts::empty())
            .with_overrides(vec!["buildout:parts+=c".parse().unwrap()]);
        let data = loader
            .load_str("[buildout]\nparts = a b\n", Path::new("/p"))
            .unwrap();
        assert_eq!(data.get("buildout", "parts").unwrap().value, "a b\nc");
    }
}
