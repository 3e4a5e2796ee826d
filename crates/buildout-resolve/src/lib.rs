//! Distribution resolution for buildout.
//!
//! Requirements name a project and a set of version bounds. Pins from the
//! `[versions]` section tighten those bounds, and `DistributionResolver`
//! finds a `WorkingSet` with at most one distribution per project. It
//! prefers develop distributions, then distributions already present, then
//! the best candidate offered by a `PackageIndex`.

pub mod constraint;
pub mod distribution;
pub mod index;
pub mod requirement;
pub mod resolver;
pub mod version;
pub mod working_set;

pub use constraint::{apply_pin, parse_pin, Pins};
pub use distribution::{DistManifest, Distribution, Location, Metadata, Precedence};
pub use index::{select_best, CatalogIndex, PackageIndex};
pub use requirement::{Op, ProjectName, Requirement, Spec};
pub use resolver::{DistributionResolver, Resolution, ResolverPolicy};
pub use version::Version;
pub use working_set::WorkingSet;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid version '{0}'")]
    InvalidVersion(String),
    #[error("invalid requirement '{text}': {reason}")]
    InvalidRequirement { text: String, reason: String },
    #[error("incompatible version pin: {requirement} cannot be combined with pin {pin}")]
    Constraint { requirement: String, pin: String },
    #[error("version conflict for {project}:\n{report}")]
    VersionConflict { project: String, report: String },
    #[error("couldn't find a distribution for '{requirement}' (required by {requirer})")]
    MissingDistribution {
        requirement: String,
        requirer: String,
    },
    #[error("{project} has no extra named '{extra}'")]
    UnknownExtra { project: String, extra: String },
    #[error("picked {project} {version}, but picking versions is not allowed")]
    PickedVersion { project: String, version: String },
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },
    #[error("unsupported URL '{0}': only local paths and file:// URLs can be fetched")]
    UnsupportedUrl(String),
    #[error("invalid catalog {}: {message}", path.display())]
    Catalog { path: PathBuf, message: String },
    #[error("working set already contains {0}")]
    DuplicateProject(String),
    #[error("resolution did not settle after {0} rounds")]
    TooManyRounds(usize),
    #[error("resolver I/O error: {0}")]
    Io(#[from] std::io::Error),
}
