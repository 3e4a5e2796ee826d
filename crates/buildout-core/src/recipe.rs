//! Recipes and the registry that maps recipe references to them.
//!
//! A part's `recipe` option names a distribution and an entry point,
//! `dist:entry`, or just `dist` for the entry `default`. The distribution is
//! resolved like any other requirement; the entry is looked up in a
//! [`RecipeRegistry`] populated at startup.

use crate::rollback::CreatedPaths;
use crate::source::DistributionSource;
use crate::CoreError;
use buildout_config::{ConfigError, ConfigResolver, Section};
use buildout_resolve::{
    Distribution, Location, Precedence, Requirement, Resolution, ResolveError, Version,
};
use buildout_store::{BuildoutLayout, Journal, RollbackStep, StoreError};
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Once;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A part's installer.
///
/// Recipes are built during planning from the part's options and hold
/// whatever they read there; `install` and `update` then only touch disk.
pub trait Recipe {
    /// Create the part's artifacts and return the paths to record.
    fn install(&mut self, ctx: &mut RecipeContext<'_>) -> Result<Vec<PathBuf>, RecipeError>;

    /// Whether [`Recipe::update`] differs from a fresh install.
    fn has_update(&self) -> bool {
        false
    }

    /// Bring an installed part up to date. Returned paths are added to the
    /// ones recorded by earlier runs.
    fn update(&mut self, ctx: &mut RecipeContext<'_>) -> Result<Vec<PathBuf>, RecipeError> {
        self.install(ctx)
    }
}

/// Builds a recipe for one part.
pub type RecipeFactory = fn(&mut RecipeSetup<'_>) -> Result<Box<dyn Recipe>, RecipeError>;

/// Cleans up after a part before its recorded paths are removed. Receives
/// the part name and the options recorded at install time.
pub type Uninstaller = fn(&str, &BTreeMap<String, String>) -> Result<(), RecipeError>;

/// What a recipe factory can see and do while a part is planned.
pub struct RecipeSetup<'a> {
    part: &'a str,
    options: Section<'a>,
    config: &'a ConfigResolver,
    layout: &'a BuildoutLayout,
    source: &'a mut DistributionSource,
    fingerprints: Vec<String>,
}

impl<'a> RecipeSetup<'a> {
    pub(crate) fn new(
        part: &'a str,
        options: Section<'a>,
        config: &'a ConfigResolver,
        layout: &'a BuildoutLayout,
        source: &'a mut DistributionSource,
    ) -> Self {
        Self {
            part,
            options,
            config,
            layout,
            source,
            fingerprints: Vec::new(),
        }
    }

    pub fn part(&self) -> &str {
        self.part
    }

    /// The part's own section. Values set here become part of the
    /// signature.
    pub fn options(&self) -> Section<'a> {
        self.options
    }

    pub fn buildout(&self) -> Result<Section<'a>, RecipeError> {
        Ok(self.config.buildout()?)
    }

    pub fn layout(&self) -> &BuildoutLayout {
        self.layout
    }

    /// `value` as a path, relative paths taken from the buildout directory.
    pub fn path(&self, value: &str) -> PathBuf {
        let path = Path::new(value.trim());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.layout.directory().join(path)
        }
    }

    /// Resolve additional distributions for this part. Their fingerprints
    /// are folded into the part's signature.
    pub fn resolve(&mut self, requirements: &[Requirement]) -> Result<Resolution, RecipeError> {
        let resolution = self.source.resolve(self.part, requirements)?;
        self.fingerprints
            .extend(resolution.working_set.fingerprints()?);
        Ok(resolution)
    }

    pub(crate) fn into_fingerprints(self) -> Vec<String> {
        self.fingerprints
    }
}

/// What a recipe can see and do while it installs or updates a part.
pub struct RecipeContext<'a> {
    part: &'a str,
    layout: &'a BuildoutLayout,
    journal: &'a Journal,
    op_id: &'a str,
    created: &'a mut CreatedPaths,
}

impl<'a> RecipeContext<'a> {
    pub(crate) fn new(
        part: &'a str,
        layout: &'a BuildoutLayout,
        journal: &'a Journal,
        op_id: &'a str,
        created: &'a mut CreatedPaths,
    ) -> Self {
        Self {
            part,
            layout,
            journal,
            op_id,
            created,
        }
    }

    pub fn part(&self) -> &str {
        self.part
    }

    pub fn layout(&self) -> &BuildoutLayout {
        self.layout
    }

    /// Register `path` as created by this attempt, before creating it.
    ///
    /// The path is journaled so an interrupted run can remove it, and it is
    /// removed again if the recipe fails.
    pub fn created(&mut self, path: impl Into<PathBuf>) -> Result<(), RecipeError> {
        let path = path.into();
        if self.created.contains(&path) {
            return Ok(());
        }
        self.journal
            .add_rollback_step(self.op_id, RollbackStep::RemovePath(path.clone()))?;
        self.created.register(path);
        Ok(())
    }
}

/// A parsed `recipe` option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeRef {
    pub requirement: Requirement,
    pub entry: String,
}

impl RecipeRef {
    pub const DEFAULT_ENTRY: &'static str = "default";

    pub fn parse(text: &str) -> Result<Self, ResolveError> {
        let text = text.trim();
        let (dist, entry) = match text.split_once(':') {
            Some((d, e)) if !e.trim().is_empty() => (d, e.trim()),
            Some((d, _)) => (d, Self::DEFAULT_ENTRY),
            None => (text, Self::DEFAULT_ENTRY),
        };
        Ok(Self {
            requirement: Requirement::parse(dist)?,
            entry: entry.to_owned(),
        })
    }
}

impl fmt::Display for RecipeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.requirement, self.entry)
    }
}

#[derive(Clone, Copy)]
struct Entry {
    factory: RecipeFactory,
    uninstaller: Option<Uninstaller>,
}

struct Provider {
    name: String,
    version: Version,
    entries: BTreeMap<String, Entry>,
}

/// Compiled-in recipe implementations, keyed by distribution and entry.
#[derive(Default)]
pub struct RecipeRegistry {
    providers: BTreeMap<String, Provider>,
}

impl fmt::Debug for RecipeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for provider in self.providers.values() {
            for entry in provider.entries.keys() {
                list.entry(&format_args!("{}:{entry}", provider.name));
            }
        }
        list.finish()
    }
}

impl RecipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the `buildout-recipes` distribution.
    pub fn with_builtins() -> Result<Self, CoreError> {
        let mut registry = Self::new();
        crate::recipes::register(&mut registry)?;
        Ok(registry)
    }

    /// Add `entry` to `distribution`. The first registration of a
    /// distribution fixes its version.
    pub fn register(
        &mut self,
        distribution: &str,
        version: &Version,
        entry: &str,
        factory: RecipeFactory,
    ) {
        let key = Requirement::new(distribution).key().to_owned();
        self.providers
            .entry(key)
            .or_insert_with(|| Provider {
                name: distribution.to_owned(),
                version: version.clone(),
                entries: BTreeMap::new(),
            })
            .entries
            .insert(
                entry.to_owned(),
                Entry {
                    factory,
                    uninstaller: None,
                },
            );
    }

    /// Attach an uninstaller to a registered entry. Returns false when the
    /// entry is unknown.
    pub fn register_uninstaller(
        &mut self,
        distribution: &str,
        entry: &str,
        uninstaller: Uninstaller,
    ) -> bool {
        let key = Requirement::new(distribution).key().to_owned();
        match self
            .providers
            .get_mut(&key)
            .and_then(|p| p.entries.get_mut(entry))
        {
            Some(e) => {
                e.uninstaller = Some(uninstaller);
                true
            }
            None => false,
        }
    }

    fn entry(&self, reference: &RecipeRef) -> Option<Entry> {
        self.providers
            .get(reference.requirement.key())
            .and_then(|p| p.entries.get(&reference.entry))
            .copied()
    }

    pub fn factory(&self, reference: &RecipeRef) -> Option<RecipeFactory> {
        self.entry(reference).map(|e| e.factory)
    }

    pub fn uninstaller(&self, reference: &RecipeRef) -> Option<Uninstaller> {
        self.entry(reference).and_then(|e| e.uninstaller)
    }

    /// One built-in distribution per providing project, to seed the set of
    /// present distributions.
    pub fn distributions(&self) -> Vec<Distribution> {
        self.providers
            .values()
            .map(|p| {
                Distribution::new(
                    &p.name,
                    p.version.clone(),
                    Location::Builtin,
                    Precedence::Prebuilt,
                )
            })
            .collect()
    }
}

thread_local! {
    static IN_RECIPE: Cell<bool> = const { Cell::new(false) };
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chain a panic hook that records a backtrace for panics raised inside
/// recipe code and stays silent for them.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if IN_RECIPE.with(Cell::get) {
                let trace = format!("{info}\n{}", Backtrace::force_capture());
                PANIC_TRACE.with(|t| *t.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

/// Run recipe code for `part`, turning a panic into [`CoreError::Internal`].
pub(crate) fn call_recipe<T>(
    part: &str,
    f: impl FnOnce() -> Result<T, RecipeError>,
) -> Result<Result<T, RecipeError>, CoreError> {
    install_panic_hook();
    IN_RECIPE.with(|flag| flag.set(true));
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    IN_RECIPE.with(|flag| flag.set(false));

    outcome.map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "recipe panicked".to_owned());
        let trace = PANIC_TRACE
            .with(|t| t.borrow_mut().take())
            .unwrap_or_else(|| Backtrace::force_capture().to_string());
        CoreError::Internal {
            part: part.to_owned(),
            message,
            trace,
        }
    })
}
