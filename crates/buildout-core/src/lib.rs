//! Part lifecycle engine for buildout.
//!
//! This crate ties configuration, distribution resolution and persisted
//! state together into the `Engine`: it plans every selected part (resolving
//! its options and the distribution that provides its recipe), uninstalls
//! parts that left the configuration, and installs or updates the rest,
//! persisting `.installed.cfg` after every part. Recipes are looked up in a
//! compiled-in `RecipeRegistry`.

pub mod concurrency;
pub mod engine;
pub mod lifecycle;
pub mod recipe;
pub mod recipes;
pub mod rollback;
pub mod settings;
pub mod signature;
pub mod source;

pub use concurrency::{install_signal_handler, shutdown_requested, RunLock};
pub use engine::{ApplyReport, Engine, Outcome, PartOutcome};
pub use lifecycle::{validate_transition, PartState};
pub use recipe::{
    Recipe, RecipeContext, RecipeError, RecipeFactory, RecipeRef, RecipeRegistry, RecipeSetup,
    Uninstaller,
};
pub use rollback::CreatedPaths;
pub use settings::BuildoutSettings;
pub use signature::part_signature;
pub use source::DistributionSource;

use buildout_config::ConfigError;
use buildout_resolve::ResolveError;
use buildout_store::{JournalAction, StoreError};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("state error: {0}")]
    Store(#[from] StoreError),
    #[error("part {part}: unknown recipe '{reference}'")]
    UnknownRecipe { part: String, reference: String },
    #[error("part {part}: {action} failed: {source}")]
    PartExecution {
        part: String,
        action: JournalAction,
        #[source]
        source: RecipeError,
    },
    #[error("part {part}: internal error in recipe: {message}")]
    Internal {
        part: String,
        message: String,
        trace: String,
    },
    #[error("invalid part transition: {from} -> {to}")]
    InvalidTransition { from: PartState, to: PartState },
    #[error("another run holds the lock on {}", path.display())]
    Locked { path: PathBuf },
    #[error("interrupted before part {next}; remaining parts were not processed")]
    Interrupted { next: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse error classes reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Configuration,
    Constraint,
    VersionConflict,
    MissingDistribution,
    PartExecution,
    Internal,
    State,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Constraint => "constraint",
            ErrorKind::VersionConflict => "version-conflict",
            ErrorKind::MissingDistribution => "missing-distribution",
            ErrorKind::PartExecution => "part-execution",
            ErrorKind::Internal => "internal",
            ErrorKind::State => "state",
        })
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Config(_) | CoreError::UnknownRecipe { .. } => ErrorKind::Configuration,
            CoreError::Resolve(e) => match e {
                ResolveError::Constraint { .. } => ErrorKind::Constraint,
                ResolveError::VersionConflict { .. } => ErrorKind::VersionConflict,
                ResolveError::MissingDistribution { .. }
                | ResolveError::ChecksumMismatch { .. }
                | ResolveError::UnsupportedUrl(_)
                | ResolveError::Catalog { .. } => ErrorKind::MissingDistribution,
                ResolveError::InvalidVersion(_)
                | ResolveError::InvalidRequirement { .. }
                | ResolveError::UnknownExtra { .. }
                | ResolveError::PickedVersion { .. } => ErrorKind::Configuration,
                ResolveError::DuplicateProject(_) | ResolveError::TooManyRounds(_) => {
                    ErrorKind::Internal
                }
                ResolveError::Io(_) => ErrorKind::State,
            },
            CoreError::PartExecution { .. } => ErrorKind::PartExecution,
            CoreError::Internal { .. } => ErrorKind::Internal,
            CoreError::Store(_)
            | CoreError::InvalidTransition { .. }
            | CoreError::Locked { .. }
            | CoreError::Interrupted { .. }
            | CoreError::Io(_)
            | CoreError::Serialization(_) => ErrorKind::State,
        }
    }

    /// Whether this is a defect in a recipe or in buildout itself rather
    /// than a problem with the user's configuration or environment.
    pub fn is_internal(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }

    /// Diagnostic trace captured for internal errors.
    pub fn trace(&self) -> Option<&str> {
        match self {
            CoreError::Internal { trace, .. } => Some(trace),
            _ => None,
        }
    }
}
