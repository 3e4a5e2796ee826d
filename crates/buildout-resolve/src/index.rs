//! The package-index seam and a catalog-backed implementation.
//!
//! Network fetching is not done here: `CatalogIndex` reads `index.toml`
//! catalogs from local `find-links` directories and copies artifacts from
//! local paths or `file://` URLs into the cache directory.

use crate::distribution::{DistManifest, Distribution, Location, Precedence, DIST_MANIFEST};
use crate::requirement::{ProjectName, Requirement};
use crate::resolver::ResolverPolicy;
use crate::ResolveError;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of a catalog inside a `find-links` directory.
pub const CATALOG_FILE: &str = "index.toml";

/// Source of candidate distributions.
pub trait PackageIndex {
    /// Every known distribution of `project`, in no particular order.
    fn candidates(&self, project: &ProjectName) -> Result<Vec<Distribution>, ResolveError>;

    /// Whether the artifact of `dist` is already in the local cache.
    fn is_cached(&self, dist: &Distribution) -> bool;

    /// Copy the artifact at `url` into the local cache and return its path.
    fn fetch(&mut self, url: &str, checksum: Option<&str>) -> Result<PathBuf, ResolveError>;

    /// Extra places to look for catalogs, e.g. a distribution's
    /// dependency links.
    fn add_find_links(&mut self, links: &[String]) -> Result<(), ResolveError>;

    /// Whether `dist` can be used without fetching anything.
    fn is_local(&self, dist: &Distribution) -> bool {
        matches!(dist.location, Location::Path(_) | Location::Builtin) || self.is_cached(dist)
    }

    /// The best candidate for `requirement` under `policy`.
    fn obtain(
        &self,
        requirement: &Requirement,
        policy: &ResolverPolicy,
    ) -> Result<Option<Distribution>, ResolveError> {
        let mut candidates = self.candidates(&requirement.project)?;
        if policy.offline {
            candidates.retain(|d| self.is_cached(d));
        }
        Ok(select_best(
            candidates,
            requirement,
            policy.prefer_final,
            |d| self.is_local(d),
        ))
    }

}

/// Pick the candidate satisfying `requirement` with the highest version.
///
/// With `prefer_final`, pre-releases are only considered when no final
/// version qualifies. Ties go to cached candidates, then to precedence.
pub fn select_best(
    candidates: Vec<Distribution>,
    requirement: &Requirement,
    prefer_final: bool,
    cached: impl Fn(&Distribution) -> bool,
) -> Option<Distribution> {
    let matching: Vec<Distribution> = candidates
        .into_iter()
        .filter(|d| requirement.contains(&d.version))
        .collect();
    let any_final = matching.iter().any(|d| d.version.is_final());
    matching
        .into_iter()
        .filter(|d| !prefer_final || !any_final || d.version.is_final())
        .max_by(|a, b| {
            a.version
                .cmp(&b.version)
                .then_with(|| cached(a).cmp(&cached(b)))
                .then_with(|| a.precedence.cmp(&b.precedence))
        })
}

#[derive(Debug, Default, Deserialize)]
struct Catalog {
    #[serde(default)]
    dist: Vec<DistManifest>,
}

/// A [`PackageIndex`] over local catalogs and a cache directory.
#[derive(Debug)]
pub struct CatalogIndex {
    cache_dir: PathBuf,
    entries: Vec<Distribution>,
    loaded: BTreeSet<PathBuf>,
}

impl CatalogIndex {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            entries: Vec::new(),
            loaded: BTreeSet::new(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Read the catalog at `link`: a directory holding `index.toml`, a
    /// catalog file, or a `file://` URL to either. Missing locations are
    /// skipped with a warning; remote URLs are ignored.
    pub fn load_catalog(&mut self, link: &str) -> Result<(), ResolveError> {
        let path = match link.strip_prefix("file://") {
            Some(p) => PathBuf::from(p),
            None if link.contains("://") => {
                debug!("ignoring remote find-links entry {link}");
                return Ok(());
            }
            None => PathBuf::from(link),
        };
        let file = if path.is_dir() {
            path.join(CATALOG_FILE)
        } else {
            path
        };
        if !file.is_file() {
            warn!("find-links location {} has no catalog", file.display());
            return Ok(());
        }
        if !self.loaded.insert(file.clone()) {
            return Ok(());
        }

        let text = fs::read_to_string(&file)?;
        let catalog: Catalog = toml::from_str(&text).map_err(|e| ResolveError::Catalog {
            path: file.clone(),
            message: e.to_string(),
        })?;
        let base = file.parent().map(Path::to_path_buf).unwrap_or_default();

        for entry in catalog.dist {
            let Some(url) = entry.url.clone() else {
                return Err(ResolveError::Catalog {
                    path: file.clone(),
                    message: format!("entry '{}' has no url", entry.name),
                });
            };
            let url = if url.contains("://") || Path::new(&url).is_absolute() {
                url
            } else {
                base.join(&url).to_string_lossy().into_owned()
            };
            let dist = entry.into_distribution(Location::Url(url), Precedence::Prebuilt)?;
            debug!("catalog {} offers {dist}", file.display());
            self.entries.push(dist);
        }
        Ok(())
    }

    /// Distributions unpacked in the cache, each described by a `dist.toml`.
    pub fn cached_distributions(&self) -> Result<Vec<Distribution>, ResolveError> {
        scan_manifests(&self.cache_dir, Precedence::Prebuilt)
    }

    /// Develop distributions rooted at `dirs`.
    pub fn develop_distributions(dirs: &[PathBuf]) -> Result<Vec<Distribution>, ResolveError> {
        dirs.iter()
            .map(|dir| Distribution::from_manifest_dir(dir, Precedence::Develop))
            .collect()
    }

    fn cache_path(&self, url: &str) -> PathBuf {
        let name = url.rsplit(['/', '\\']).next().unwrap_or(url);
        self.cache_dir.join(name)
    }
}

fn scan_manifests(dir: &Path, precedence: Precedence) -> Result<Vec<Distribution>, ResolveError> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.join(DIST_MANIFEST).is_file() {
            out.push(Distribution::from_manifest_dir(&path, precedence)?);
        }
    }
    Ok(out)
}

fn local_source(url: &str) -> Result<PathBuf, ResolveError> {
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if url.contains("://") {
        return Err(ResolveError::UnsupportedUrl(url.to_owned()));
    }
    Ok(PathBuf::from(url))
}

fn verify(url: &str, bytes: &[u8], expected: Option<&str>) -> Result<(), ResolveError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = blake3::hash(bytes).to_hex().to_string();
    if actual != expected {
        return Err(ResolveError::ChecksumMismatch {
            url: url.to_owned(),
            expected: expected.to_owned(),
            actual,
        });
    }
    Ok(())
}

impl PackageIndex for CatalogIndex {
    fn candidates(&self, project: &ProjectName) -> Result<Vec<Distribution>, ResolveError> {
        let mut out: Vec<Distribution> = self
            .entries
            .iter()
            .filter(|d| &d.project == project)
            .cloned()
            .collect();
        out.extend(
            self.cached_distributions()?
                .into_iter()
                .filter(|d| &d.project == project),
        );
        Ok(out)
    }

    fn is_cached(&self, dist: &Distribution) -> bool {
        match &dist.location {
            Location::Url(url) => self.cache_path(url).exists(),
            Location::Path(path) => path.starts_with(&self.cache_dir),
            Location::Builtin => true,
        }
    }

    fn fetch(&mut self, url: &str, checksum: Option<&str>) -> Result<PathBuf, ResolveError> {
        let source = local_source(url)?;
        let dest = self.cache_path(url);
        if dest.is_file() {
            verify(url, &fs::read(&dest)?, checksum)?;
            debug!("{url} already cached at {}", dest.display());
            return Ok(dest);
        }

        let bytes = fs::read(&source)?;
        verify(url, &bytes, checksum)?;
        fs::create_dir_all(&self.cache_dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.cache_dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| ResolveError::Io(e.error))?;
        debug!("fetched {url} into {}", dest.display());
        Ok(dest)
    }

    fn add_find_links(&mut self, links: &[String]) -> Result<(), ResolveError> {
        for link in links {
            self.load_catalog(link)?;
        }
        Ok(())
    }
}
