//! Configuration loading and resolution for buildout.
//!
//! This crate turns ini-style configuration text into resolved option values:
//! the parser produces `RawConfigData` with provenance, `ConfigLoader` layers
//! defaults, user defaults, the `extends` chain and command-line assignments,
//! and `ConfigResolver` performs lazy `${section:option}` substitution and
//! `<` macro inheritance over an arena of sections.

pub mod condition;
pub mod dump;
pub mod loader;
pub mod parser;
pub mod raw;
pub mod resolver;
pub mod section;

pub use condition::EnvironmentFacts;
pub use dump::{annotate, render, AnnotatedOption};
pub use loader::{
    default_user_defaults_path, expand_tilde, ConfigLoader, Override, BUILDOUT_SECTION,
};
pub use parser::parse;
pub use raw::{
    join_lines, remove_lines, Annotation, EditOp, Provenance, RawConfigData, RawSection, RawValue,
};
pub use resolver::ConfigResolver;
pub use section::Section;

use std::path::PathBuf;
use thiserror::Error;

/// Option naming the sections a section inherits from.
pub const MACRO_OPTION: &str = "<";
/// Option naming the sections a part must be configured after.
pub const PART_DEPENDENCIES_OPTION: &str = "<part-dependencies>";
/// Pseudo-option that always resolves to the owning section's name.
pub const SECTION_NAME_OPTION: &str = "_buildout_section_name_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{origin}:{line}: {message}")]
    Parse {
        origin: String,
        line: usize,
        message: String,
    },
    #[error("{origin}:{line}: invalid section condition '{expression}': {reason}")]
    BadCondition {
        origin: String,
        line: usize,
        expression: String,
        reason: String,
    },
    #[error("configuration file not found: {} (extends chain: {chain})", path.display())]
    FileNotFound { path: PathBuf, chain: String },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("recursive file extension: {chain}")]
    RecursiveInclude { chain: String },
    #[error("bad substitution '{text}': {reason}")]
    BadSubstitution { text: String, reason: String },
    #[error("referenced section does not exist: {0}")]
    MissingSection(String),
    #[error("missing option: {section}:{option}")]
    MissingOption { section: String, option: String },
    #[error("circular reference in substitutions: {chain}")]
    CircularReference { chain: String },
    #[error("infinite loop in section macros: {chain}")]
    MacroLoop { chain: String },
    #[error("invalid value for boolean option {section}:{option}: '{value}'")]
    InvalidBool {
        section: String,
        option: String,
        value: String,
    },
    #[error("invalid command-line assignment '{0}', expected section:option=value")]
    InvalidOverride(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
