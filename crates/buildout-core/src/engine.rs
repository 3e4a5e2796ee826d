use crate::concurrency::{shutdown_requested, RunLock};
use crate::lifecycle::{validate_transition, PartState};
use crate::recipe::{call_recipe, Recipe, RecipeContext, RecipeError, RecipeRef, RecipeRegistry, RecipeSetup};
use crate::rollback::CreatedPaths;
use crate::settings::BuildoutSettings;
use crate::signature::part_signature;
use crate::source::DistributionSource;
use crate::CoreError;
use buildout_config::{ConfigError, ConfigResolver, BUILDOUT_SECTION, PART_DEPENDENCIES_OPTION};
use buildout_store::{remove_path, InstalledPartRecord, InstalledState, Journal, JournalAction};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Central orchestration engine for one buildout run.
///
/// Planning resolves every part before anything on disk changes; applying
/// then uninstalls parts that left the configuration and installs or
/// updates the rest, rewriting the state file after every part.
pub struct Engine<'a> {
    config: &'a ConfigResolver,
    registry: &'a RecipeRegistry,
    settings: BuildoutSettings,
    source: DistributionSource,
    journal: Journal,
}

struct PlannedPart {
    name: String,
    reference: RecipeRef,
    recipe: Box<dyn Recipe>,
    options: BTreeMap<String, String>,
    signature: String,
}

#[derive(Default)]
struct Planner {
    in_progress: Vec<String>,
    done: HashSet<String>,
    planned: Vec<PlannedPart>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Installed,
    Updated,
    Unchanged,
    Uninstalled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Outcome::Installed => "installed",
            Outcome::Updated => "updated",
            Outcome::Unchanged => "unchanged",
            Outcome::Uninstalled => "uninstalled",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PartOutcome {
    pub part: String,
    pub outcome: Outcome,
    pub paths: Vec<PathBuf>,
}

/// Result of a successful [`Engine::apply`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub parts: Vec<PartOutcome>,
    /// `(project, version)` chosen without an exact pin.
    pub picked: Vec<(String, String)>,
    /// Interrupted operations rolled back before planning.
    pub recovered: usize,
}

impl ApplyReport {
    pub fn outcome(&self, part: &str) -> Option<Outcome> {
        self.parts.iter().find(|p| p.part == part).map(|p| p.outcome)
    }

    /// Number of recipe install or update calls made.
    pub fn recipe_calls(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p.outcome, Outcome::Installed | Outcome::Updated))
            .count()
    }
}

impl<'a> Engine<'a> {
    /// Read settings from `config` and build the default distribution
    /// source: catalogs from `find-links`, develop distributions, and the
    /// registry's built-in ones.
    pub fn new(config: &'a ConfigResolver, registry: &'a RecipeRegistry) -> Result<Self, CoreError> {
        let settings = BuildoutSettings::from_config(config)?;
        let source = DistributionSource::from_settings(&settings, registry.distributions())?;
        Ok(Self::with_source(config, registry, settings, source))
    }

    pub fn with_source(
        config: &'a ConfigResolver,
        registry: &'a RecipeRegistry,
        settings: BuildoutSettings,
        source: DistributionSource,
    ) -> Self {
        let journal = Journal::new(&settings.layout);
        Self {
            config,
            registry,
            settings,
            source,
            journal,
        }
    }

    pub fn settings(&self) -> &BuildoutSettings {
        &self.settings
    }

    /// The persisted state as of now.
    pub fn installed(&self) -> Result<InstalledState, CoreError> {
        Ok(InstalledState::load(&self.settings.layout.installed_file)?)
    }

    /// Run the buildout.
    ///
    /// With no `selected` parts, every part in `buildout:parts` is processed
    /// and installed parts no longer listed are uninstalled. Otherwise only
    /// the selected parts and what they depend on are processed.
    pub fn apply(&mut self, selected: &[String]) -> Result<ApplyReport, CoreError> {
        let _lock = RunLock::try_acquire(&self.settings.layout.lock_file())?;

        let installed_file = self.settings.layout.installed_file.clone();
        let mut state = InstalledState::load(&installed_file)?;
        let recovered = self.recover(&state)?;

        let roots = if selected.is_empty() {
            self.settings.parts.clone()
        } else {
            selected.to_vec()
        };
        let plan = self.plan(&roots)?;
        info!(
            "planned {} part(s): {}",
            plan.len(),
            plan.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(" ")
        );

        let mut report = ApplyReport {
            recovered,
            ..ApplyReport::default()
        };

        if selected.is_empty() {
            let keep: HashSet<&str> = plan.iter().map(|p| p.name.as_str()).collect();
            let removed: Vec<String> = state
                .iter()
                .rev()
                .filter(|r| !keep.contains(r.name.as_str()))
                .map(|r| r.name.clone())
                .collect();
            for name in removed {
                report.parts.push(self.uninstall(&mut state, &name)?);
            }
        }

        for part in plan {
            if shutdown_requested() {
                return Err(CoreError::Interrupted { next: part.name });
            }
            report.parts.push(self.install_or_update(&mut state, part)?);
        }

        report.picked = self
            .source
            .picked()
            .into_iter()
            .map(|(p, v)| (p.to_string(), v.to_string()))
            .collect();
        if self.settings.show_picked_versions && !report.picked.is_empty() {
            info!("versions picked without a pin:");
            for (project, version) in &report.picked {
                info!("  {project} = {version}");
            }
        }
        Ok(report)
    }

    /// Roll back operations a previous process did not finish. Paths owned
    /// by a persisted record are kept.
    fn recover(&self, state: &InstalledState) -> Result<usize, CoreError> {
        let undone = self.journal.recover(|entry, path| {
            state
                .get(&entry.part)
                .is_some_and(|record| record.paths.iter().any(|p| p == path))
        })?;
        if !undone.is_empty() {
            warn!("rolled back {} interrupted operation(s)", undone.len());
        }
        Ok(undone.len())
    }

    fn plan(&mut self, roots: &[String]) -> Result<Vec<PlannedPart>, CoreError> {
        let mut planner = Planner::default();
        for root in roots {
            self.plan_part(root, &mut planner)?;
        }
        Ok(planner.planned)
    }

    /// Configure `name` and everything it depends on, appending parts to the
    /// plan in the order their configuration completes.
    fn plan_part(&mut self, name: &str, planner: &mut Planner) -> Result<(), CoreError> {
        if planner.done.contains(name) {
            return Ok(());
        }
        if planner.in_progress.iter().any(|p| p == name) {
            let mut chain = planner.in_progress.clone();
            chain.push(name.to_owned());
            return Err(ConfigError::CircularReference {
                chain: chain.join(" -> "),
            }
            .into());
        }
        planner.in_progress.push(name.to_owned());

        let config = self.config;
        let section = config.section(name)?;
        for dependency in section.get_list(PART_DEPENDENCIES_OPTION)? {
            self.plan_dependency(&dependency, planner)?;
        }

        let reference = RecipeRef::parse(&section.require("recipe")?)?;
        debug!("part {name}: recipe {reference}");
        let resolution = self
            .source
            .resolve(name, std::slice::from_ref(&reference.requirement))?;
        let factory = self
            .registry
            .factory(&reference)
            .ok_or_else(|| CoreError::UnknownRecipe {
                part: name.to_owned(),
                reference: reference.to_string(),
            })?;

        let mut setup = RecipeSetup::new(
            name,
            section,
            config,
            &self.settings.layout,
            &mut self.source,
        );
        let recipe = call_recipe(name, || factory(&mut setup))?
            .map_err(|e| setup_error(name, e))?;
        let mut fingerprints = resolution.working_set.fingerprints()?;
        fingerprints.extend(setup.into_fingerprints());
        fingerprints.sort();
        fingerprints.dedup();

        let options = section.snapshot()?;
        // Referencing a part that is still being configured only orders it.
        for referenced in section.references() {
            if referenced != name
                && referenced != BUILDOUT_SECTION
                && !planner.in_progress.contains(&referenced)
            {
                self.plan_dependency(&referenced, planner)?;
            }
        }

        let signature = part_signature(&options, &fingerprints)?;
        planner.in_progress.pop();
        planner.done.insert(name.to_owned());
        planner.planned.push(PlannedPart {
            name: name.to_owned(),
            reference,
            recipe,
            options,
            signature,
        });
        Ok(())
    }

    /// Plan `name` first if it is a part. A plain section is resolved and
    /// the parts it references are planned in its place.
    fn plan_dependency(&mut self, name: &str, planner: &mut Planner) -> Result<(), CoreError> {
        if planner.done.contains(name) {
            return Ok(());
        }
        let config = self.config;
        let section = config.section(name)?;
        if section.get("recipe")?.is_some() {
            debug!("including part {name}");
            return self.plan_part(name, planner);
        }

        section.snapshot()?;
        planner.in_progress.push(name.to_owned());
        for referenced in section.references() {
            if referenced != BUILDOUT_SECTION && !planner.in_progress.contains(&referenced) {
                self.plan_dependency(&referenced, planner)?;
            }
        }
        planner.in_progress.pop();
        planner.done.insert(name.to_owned());
        Ok(())
    }

    fn install_or_update(
        &mut self,
        state: &mut InstalledState,
        mut part: PlannedPart,
    ) -> Result<PartOutcome, CoreError> {
        let prior = state.get(&part.name).cloned();
        if let Some(prior) = &prior {
            let missing = prior.missing_paths();
            if prior.signature == part.signature && missing.is_empty() {
                debug!("part {} unchanged", part.name);
                return Ok(PartOutcome {
                    part: part.name,
                    outcome: Outcome::Unchanged,
                    paths: prior.paths.clone(),
                });
            }
            if prior.signature == part.signature {
                info!(
                    "part {}: {} recorded path(s) missing, updating",
                    part.name,
                    missing.len()
                );
            }
        }

        let (action, from, to) = match &prior {
            Some(_) => (JournalAction::Update, PartState::Installed, PartState::Updated),
            None => (JournalAction::Install, PartState::Absent, PartState::Installed),
        };
        validate_transition(from, to)?;
        info!("{} part {}", progress(action), part.name);

        let op_id = self.journal.begin(action, &part.name)?;
        let mut created = CreatedPaths::new();
        let result = {
            let mut ctx = RecipeContext::new(
                &part.name,
                &self.settings.layout,
                &self.journal,
                &op_id,
                &mut created,
            );
            let recipe = &mut part.recipe;
            call_recipe(&part.name, || {
                if action == JournalAction::Update {
                    if recipe.has_update() {
                        return recipe.update(&mut ctx);
                    }
                    warn!(
                        "recipe {} has no update method, installing part {} again",
                        part.reference, part.name
                    );
                }
                recipe.install(&mut ctx)
            })
        };

        let failure = match result {
            Ok(Ok(returned)) => {
                let registered = created.disarm();
                let mut paths = prior.map(|p| p.paths).unwrap_or_default();
                for path in returned.into_iter().chain(registered) {
                    let path = if path.is_absolute() {
                        path
                    } else {
                        self.settings.layout.directory().join(path)
                    };
                    if !paths.contains(&path) {
                        paths.push(path);
                    }
                }
                state.upsert(InstalledPartRecord {
                    name: part.name.clone(),
                    options: part.options,
                    signature: part.signature,
                    paths: paths.clone(),
                });
                state.save(&self.settings.layout.installed_file)?;
                self.journal.commit(&op_id)?;
                return Ok(PartOutcome {
                    part: part.name,
                    outcome: if action == JournalAction::Update {
                        Outcome::Updated
                    } else {
                        Outcome::Installed
                    },
                    paths,
                });
            }
            Ok(Err(source)) => CoreError::PartExecution {
                part: part.name.clone(),
                action,
                source,
            },
            Err(internal) => internal,
        };

        validate_transition(to, PartState::Failed)?;
        warn!("part {} failed, rolling back", part.name);
        created.rollback();
        if let Some(prior) = prior {
            self.discard(state, &prior);
            state.save(&self.settings.layout.installed_file)?;
        }
        self.journal.commit(&op_id)?;
        validate_transition(PartState::Failed, PartState::Absent)?;
        Err(failure)
    }

    fn uninstall(
        &mut self,
        state: &mut InstalledState,
        name: &str,
    ) -> Result<PartOutcome, CoreError> {
        let Some(record) = state.get(name).cloned() else {
            return Err(CoreError::InvalidTransition {
                from: PartState::Absent,
                to: PartState::Uninstalled,
            });
        };
        validate_transition(PartState::Installed, PartState::Uninstalled)?;
        info!("uninstalling part {name}");

        self.run_uninstaller(&record)?;
        for path in record.paths.iter().rev() {
            if remove_path(path)? {
                debug!("removed {}", path.display());
            }
        }
        state.remove(name);
        state.save(&self.settings.layout.installed_file)?;
        Ok(PartOutcome {
            part: record.name,
            outcome: Outcome::Uninstalled,
            paths: record.paths,
        })
    }

    /// Drop a record whose update failed, removing what it installed.
    /// Problems are logged; the update error is what gets reported.
    fn discard(&self, state: &mut InstalledState, record: &InstalledPartRecord) {
        if let Err(e) = self.run_uninstaller(record) {
            warn!("uninstalling {} after failed update: {e}", record.name);
        }
        for path in record.paths.iter().rev() {
            if let Err(e) = remove_path(path) {
                warn!("failed to remove {}: {e}", path.display());
            }
        }
        state.remove(&record.name);
    }

    /// Call the uninstaller registered for the recipe recorded at install
    /// time, not the one configured now.
    fn run_uninstaller(&self, record: &InstalledPartRecord) -> Result<(), CoreError> {
        let Some(text) = record.recipe() else {
            return Ok(());
        };
        let reference = match RecipeRef::parse(text) {
            Ok(r) => r,
            Err(e) => {
                warn!("part {}: unreadable recorded recipe '{text}': {e}", record.name);
                return Ok(());
            }
        };
        let Some(uninstall) = self.registry.uninstaller(&reference) else {
            return Ok(());
        };
        call_recipe(&record.name, || uninstall(&record.name, &record.options))?.map_err(
            |source| CoreError::PartExecution {
                part: record.name.clone(),
                action: JournalAction::Uninstall,
                source,
            },
        )
    }
}

fn progress(action: JournalAction) -> &'static str {
    match action {
        JournalAction::Install => "installing",
        JournalAction::Update => "updating",
        JournalAction::Uninstall => "uninstalling",
    }
}

/// Errors raised while a recipe reads its options are configuration
/// problems, not execution failures.
fn setup_error(part: &str, error: RecipeError) -> CoreError {
    match error {
        RecipeError::Config(e) => CoreError::Config(e),
        RecipeError::Resolve(e) => CoreError::Resolve(e),
        RecipeError::Store(e) => CoreError::Store(e),
        other => CoreError::PartExecution {
            part: part.to_owned(),
            action: JournalAction::Install,
            source: other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use buildout_config::{ConfigLoader, EnvironmentFacts};
    use std::fs;
    use std::path::Path;

    fn config(dir: &Path, text: &str) -> ConfigResolver {
        let data = ConfigLoader::new()
            .with_facts(EnvironmentFacts::empty())
            .load_str(text, dir)
            .unwrap();
        ConfigResolver::new(data)
    }

    #[test]
    fn builtin_recipes_install_then_stay_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RecipeRegistry::with_builtins().unwrap();
        let config = config(
            dir.path(),
            "[buildout]\nparts = logs motd\n\n\
             [logs]\nrecipe = buildout-recipes:mkdir\npaths = var/log\n\n\
             [motd]\nrecipe = buildout-recipes:file\noutput = etc/motd\ncontent = hello\n",
        );

        let mut engine = Engine::new(&config, &registry).unwrap();
        let report = engine.apply(&[]).unwrap();
        assert_eq!(report.outcome("logs"), Some(Outcome::Installed));
        assert_eq!(report.outcome("motd"), Some(Outcome::Installed));
        assert!(dir.path().join("var/log").is_dir());
        assert_eq!(fs::read_to_string(dir.path().join("etc/motd")).unwrap(), "hello");

        let state = engine.installed().unwrap();
        assert_eq!(state.names(), vec!["logs", "motd"]);
        assert!(state.get("motd").unwrap().paths.contains(&dir.path().join("etc")));

        let again = Engine::new(&config, &registry).unwrap().apply(&[]).unwrap();
        assert_eq!(again.recipe_calls(), 0);
        assert_eq!(again.outcome("motd"), Some(Outcome::Unchanged));
    }

    #[test]
    fn referenced_part_is_installed_first() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RecipeRegistry::with_builtins().unwrap();
        let config = config(
            dir.path(),
            "[buildout]\nparts = motd\n\n\
             [motd]\nrecipe = buildout-recipes:file\noutput = motd\ncontent = logs in ${logs:paths}\n\n\
             [logs]\nrecipe = buildout-recipes:mkdir\npaths = var/log\n",
        );
        let report = Engine::new(&config, &registry).unwrap().apply(&[]).unwrap();
        let order: Vec<_> = report.parts.iter().map(|p| p.part.as_str()).collect();
        assert_eq!(order, vec!["logs", "motd"]);
        let content = fs::read_to_string(dir.path().join("motd")).unwrap();
        assert!(content.ends_with("var/log"), "{content}");
    }

    #[test]
    fn part_reached_through_a_plain_section_is_installed_first() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RecipeRegistry::with_builtins().unwrap();
        let config = config(
            dir.path(),
            "[buildout]\nparts = motd\n\n\
             [motd]\nrecipe = buildout-recipes:file\noutput = motd\ncontent = ${paths:logdir}\n\n\
             [paths]\nlogdir = ${logs:paths}\nself = ${paths:logdir}\n\n\
             [logs]\nrecipe = buildout-recipes:mkdir\npaths = var/log\n",
        );
        let report = Engine::new(&config, &registry).unwrap().apply(&[]).unwrap();
        let order: Vec<_> = report.parts.iter().map(|p| p.part.as_str()).collect();
        assert_eq!(order, vec!["logs", "motd"]);
        assert!(dir.path().join("var/log").is_dir());
    }

    #[test]
    fn failed_write_leaves_existing_output_alone() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("taken")).unwrap();
        fs::write(dir.path().join("taken/keep"), "mine").unwrap();
        let registry = RecipeRegistry::with_builtins().unwrap();
        let config = config(
            dir.path(),
            "[buildout]\nparts = motd\n\n\
             [motd]\nrecipe = buildout-recipes:file\noutput = taken\ncontent = hi\n",
        );
        let err = Engine::new(&config, &registry).unwrap().apply(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartExecution);
        assert_eq!(fs::read_to_string(dir.path().join("taken/keep")).unwrap(), "mine");
    }

    #[test]
    fn circular_part_dependencies_are_configuration_errors() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RecipeRegistry::with_builtins().unwrap();
        let config = config(
            dir.path(),
            "[buildout]\nparts = a\n\n\
             [a]\nrecipe = buildout-recipes:mkdir\npaths = a\n<part-dependencies> = b\n\n\
             [b]\nrecipe = buildout-recipes:mkdir\npaths = b\n<part-dependencies> = a\n",
        );
        let err = Engine::new(&config, &registry).unwrap().apply(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("a -> b -> a"), "{err}");
        assert!(!dir.path().join(".installed.cfg").exists());
    }

    #[test]
    fn unknown_entry_point_is_reported_before_anything_runs() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RecipeRegistry::with_builtins().unwrap();
        let config = config(
            dir.path(),
            "[buildout]\nparts = ok bad\n\n\
             [ok]\nrecipe = buildout-recipes:mkdir\npaths = ok\n\n\
             [bad]\nrecipe = buildout-recipes:nope\n",
        );
        let err = Engine::new(&config, &registry).unwrap().apply(&[]).unwrap_err();
        assert!(matches!(err, CoreError::UnknownRecipe { ref part, .. } if part == "bad"));
        assert!(!dir.path().join("ok").exists());
    }

    #[test]
    fn concurrent_run_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RecipeRegistry::with_builtins().unwrap();
        let config = config(dir.path(), "[buildout]\nparts =\n");
        let mut engine = Engine::new(&config, &registry).unwrap();
        let held = RunLock::try_acquire(&engine.settings().layout.lock_file()).unwrap();
        let err = engine.apply(&[]).unwrap_err();
        assert!(matches!(err, CoreError::Locked { .. }));
        assert_eq!(err.kind(), ErrorKind::State);
        drop(held);
        assert!(engine.apply(&[]).unwrap().parts.is_empty());
    }

    #[test]
    fn report_helpers() {
        let report = ApplyReport {
            parts: vec![
                PartOutcome {
                    part: "a".into(),
                    outcome: Outcome::Installed,
                    paths: Vec::new(),
                },
                PartOutcome {
                    part: "b".into(),
                    outcome: Outcome::Unchanged,
                    paths: Vec::new(),
                },
            ],
            ..ApplyReport::default()
        };
        assert_eq!(report.recipe_calls(), 1);
        assert_eq!(report.outcome("b"), Some(Outcome::Unchanged));
        assert_eq!(report.outcome("c"), None);
        assert_eq!(Outcome::Uninstalled.to_string(), "uninstalled");
    }
}
