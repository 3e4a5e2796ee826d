use crate::requirement::{ProjectName, Requirement};
use crate::version::Version;
use crate::ResolveError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the manifest that describes a develop or cached distribution.
pub const DIST_MANIFEST: &str = "dist.toml";

/// Resolution preference; higher wins. Develop distributions are local,
/// editable source trees and always take priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precedence {
    Source,
    Prebuilt,
    Develop,
}

impl fmt::Display for Precedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Precedence::Source => "source",
            Precedence::Prebuilt => "prebuilt",
            Precedence::Develop => "develop",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Location {
    Path(PathBuf),
    Url(String),
    /// Compiled into the running binary.
    Builtin,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Path(p) => write!(f, "{}", p.display()),
            Location::Url(u) => f.write_str(u),
            Location::Builtin => f.write_str("<builtin>"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub requires: Vec<Requirement>,
    pub extras: BTreeMap<String, Vec<Requirement>>,
    pub dependency_links: Vec<String>,
    pub namespace_package: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Distribution {
    pub project: ProjectName,
    pub version: Version,
    pub location: Location,
    pub precedence: Precedence,
    pub metadata: Metadata,
    pub checksum: Option<String>,
}

impl Distribution {
    pub fn new(project: &str, version: Version, location: Location, precedence: Precedence) -> Self {
        Self {
            project: ProjectName::new(project),
            version,
            location,
            precedence,
            metadata: Metadata::default(),
            checksum: None,
        }
    }

    #[must_use]
    pub fn with_requires(mut self, requires: Vec<Requirement>) -> Self {
        self.metadata.requires = requires;
        self
    }

    pub fn key(&self) -> &str {
        self.project.key()
    }

    pub fn is_develop(&self) -> bool {
        self.precedence == Precedence::Develop
    }

    /// Requirements pulled in by `extra`, or `None` if no such extra exists.
    pub fn extra(&self, extra: &str) -> Option<&[Requirement]> {
        self.metadata.extras.get(extra).map(Vec::as_slice)
    }

    /// Content fingerprint used in part signatures.
    ///
    /// Develop distributions hash their whole source tree so edits trigger
    /// an update. Everything else is identified by name, version and the
    /// artifact checksum.
    pub fn fingerprint(&self) -> Result<String, ResolveError> {
        match (&self.location, self.precedence) {
            (Location::Path(dir), Precedence::Develop) => hash_tree(dir),
            _ => {
                let mut hasher = blake3::Hasher::new();
                hasher.update(format!("{}=={}", self.project.key(), self.version).as_bytes());
                if let Some(sum) = &self.checksum {
                    hasher.update(b"\0");
                    hasher.update(sum.as_bytes());
                }
                Ok(hasher.finalize().to_hex().to_string())
            }
        }
    }

    /// Load a `dist.toml` manifest from `dir`.
    pub fn from_manifest_dir(dir: &Path, precedence: Precedence) -> Result<Self, ResolveError> {
        let path = dir.join(DIST_MANIFEST);
        let text = fs::read_to_string(&path)?;
        let manifest: DistManifest = toml::from_str(&text).map_err(|e| ResolveError::Catalog {
            path: path.clone(),
            message: e.to_string(),
        })?;
        manifest.into_distribution(Location::Path(dir.to_path_buf()), precedence)
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.project, self.version)
    }
}

/// On-disk description of a distribution, shared by `dist.toml` manifests
/// and the `[[dist]]` entries of an `index.toml` catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DistManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub precedence: Option<Precedence>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub extras: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub dependency_links: Vec<String>,
    #[serde(default)]
    pub namespace_package: bool,
}

impl DistManifest {
    pub fn into_distribution(
        self,
        location: Location,
        precedence: Precedence,
    ) -> Result<Distribution, ResolveError> {
        let parse_all = |reqs: &[String]| -> Result<Vec<Requirement>, ResolveError> {
            reqs.iter().map(|r| Requirement::parse(r)).collect()
        };
        let mut extras = BTreeMap::new();
        for (name, reqs) in &self.extras {
            extras.insert(name.clone(), parse_all(reqs)?);
        }
        Ok(Distribution {
            project: ProjectName::new(&self.name),
            version: Version::parse(&self.version)?,
            location,
            precedence: self.precedence.unwrap_or(precedence),
            metadata: Metadata {
                requires: parse_all(&self.requires)?,
                extras,
                dependency_links: self.dependency_links,
                namespace_package: self.namespace_package,
            },
            checksum: self.checksum,
        })
    }
}

/// blake3 over the sorted relative paths and contents of a directory tree.
/// Hidden entries are skipped.
fn hash_tree(root: &Path) -> Result<String, ResolveError> {
    let mut entries = Vec::new();
    collect_files(root, root, &mut entries)?;
    entries.sort();

    let mut hasher = blake3::Hasher::new();
    for (rel, full) in &entries {
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(&fs::read(full)?);
        hasher.update(b"\0");
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn collect_files(
    root: &Path,
    current: &Path,
    out: &mut Vec<(String, PathBuf)>,
) -> Result<(), ResolveError> {
    for entry in fs::read_dir(current)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let full = entry.path();
        let meta = full.symlink_metadata()?;
        if meta.is_dir() {
            collect_files(root, &full, out)?;
        } else {
            let rel = full
                .strip_prefix(root)
                .map_err(|e| std::io::Error::other(format!("path strip: {e}")))?
                .to_string_lossy()
                .replace('\\', "/");
            out.push((rel, full));
        }
    }
    Ok(())
}
