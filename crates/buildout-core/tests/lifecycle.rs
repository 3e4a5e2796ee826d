//! Install, update, uninstall and failure handling across runs.

use buildout_config::{ConfigLoader, ConfigResolver, EnvironmentFacts};
use buildout_core::{
    ApplyReport, CoreError, Engine, ErrorKind, Outcome, Recipe, RecipeContext, RecipeError,
    RecipeRegistry, RecipeSetup,
};
use buildout_resolve::Version;
use buildout_store::{BuildoutLayout, InstalledState, Journal, JournalAction, RollbackStep};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const DIST: &str = "test-recipes";

static UNINSTALLED: Mutex<Vec<String>> = Mutex::new(Vec::new());

struct Touch {
    path: PathBuf,
    fail: bool,
    panic: bool,
}

impl Recipe for Touch {
    fn install(&mut self, ctx: &mut RecipeContext<'_>) -> Result<Vec<PathBuf>, RecipeError> {
        ctx.created(&self.path)?;
        fs::write(&self.path, ctx.part())?;
        assert!(!self.panic, "touch exploded");
        if self.fail {
            return Err(RecipeError::Failed("refusing to finish".into()));
        }
        Ok(vec![self.path.clone()])
    }

    fn has_update(&self) -> bool {
        true
    }
}

fn touch(setup: &mut RecipeSetup<'_>) -> Result<Box<dyn Recipe>, RecipeError> {
    let options = setup.options();
    Ok(Box::new(Touch {
        path: setup.path(&options.require("path")?),
        fail: options.get_bool("fail", false)?,
        panic: options.get_bool("panic", false)?,
    }))
}

fn forget(part: &str, _options: &BTreeMap<String, String>) -> Result<(), RecipeError> {
    UNINSTALLED.lock().unwrap().push(part.to_owned());
    Ok(())
}

fn uninstall_count(part: &str) -> usize {
    UNINSTALLED
        .lock()
        .unwrap()
        .iter()
        .filter(|p| *p == part)
        .count()
}

fn registry() -> RecipeRegistry {
    let mut registry = RecipeRegistry::with_builtins().unwrap();
    registry.register(DIST, &Version::parse("1.0").unwrap(), "touch", touch);
    assert!(registry.register_uninstaller(DIST, "touch", forget));
    registry
}

fn run(dir: &Path, text: &str) -> Result<ApplyReport, CoreError> {
    let data = ConfigLoader::new()
        .with_facts(EnvironmentFacts::empty())
        .load_str(text, dir)
        .unwrap();
    let config = ConfigResolver::new(data);
    let registry = registry();
    let mut engine = Engine::new(&config, &registry)?;
    engine.apply(&[])
}

fn state(dir: &Path) -> InstalledState {
    InstalledState::load(&dir.join(".installed.cfg")).unwrap()
}

#[test]
fn second_run_makes_no_recipe_calls() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = "[buildout]\nparts = one two\n\n\
               [one]\nrecipe = test-recipes:touch\npath = one.txt\n\n\
               [two]\nrecipe = test-recipes:touch\npath = two.txt\n";
    let first = run(dir.path(), cfg).unwrap();
    assert_eq!(first.recipe_calls(), 2);
    assert_eq!(state(dir.path()).names(), vec!["one", "two"]);

    let second = run(dir.path(), cfg).unwrap();
    assert_eq!(second.recipe_calls(), 0);
    assert!(second.parts.iter().all(|p| p.outcome == Outcome::Unchanged));
}

#[test]
fn changed_option_updates_the_part() {
    let dir = tempfile::tempdir().unwrap();
    run(
        dir.path(),
        "[buildout]\nparts = web\n\n[web]\nrecipe = test-recipes:touch\npath = web.txt\nport = 80\n",
    )
    .unwrap();
    let before = state(dir.path()).get("web").unwrap().signature.clone();

    let report = run(
        dir.path(),
        "[buildout]\nparts = web\n\n[web]\nrecipe = test-recipes:touch\npath = web.txt\nport = 8080\n",
    )
    .unwrap();
    assert_eq!(report.outcome("web"), Some(Outcome::Updated));
    let record = state(dir.path()).get("web").cloned().unwrap();
    assert_ne!(record.signature, before);
    assert_eq!(record.options["port"], "8080");
}

#[test]
fn missing_recorded_path_triggers_reinstall() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = "[buildout]\nparts = gone\n\n[gone]\nrecipe = test-recipes:touch\npath = gone.txt\n";
    run(dir.path(), cfg).unwrap();
    fs::remove_file(dir.path().join("gone.txt")).unwrap();

    let report = run(dir.path(), cfg).unwrap();
    assert_eq!(report.outcome("gone"), Some(Outcome::Updated));
    assert!(dir.path().join("gone.txt").exists());
}

#[test]
fn failed_install_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let err = run(
        dir.path(),
        "[buildout]\nparts = ok broken\n\n\
         [ok]\nrecipe = test-recipes:touch\npath = ok.txt\n\n\
         [broken]\nrecipe = test-recipes:touch\npath = broken.txt\nfail = true\n",
    )
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PartExecution);
    assert!(err.to_string().contains("broken"), "{err}");
    assert!(!dir.path().join("broken.txt").exists());
    // Parts finished before the failure stay recorded.
    let state = state(dir.path());
    assert!(state.get("broken").is_none());
    assert!(state.get("ok").is_some());
    assert!(dir.path().join("ok.txt").exists());
}

#[test]
fn failed_update_drops_the_old_record() {
    let dir = tempfile::tempdir().unwrap();
    run(
        dir.path(),
        "[buildout]\nparts = flaky\n\n[flaky]\nrecipe = test-recipes:touch\npath = flaky.txt\n",
    )
    .unwrap();

    let err = run(
        dir.path(),
        "[buildout]\nparts = flaky\n\n[flaky]\nrecipe = test-recipes:touch\npath = flaky.txt\nfail = on\n",
    )
    .unwrap_err();
    assert!(matches!(
        err,
        CoreError::PartExecution {
            action: JournalAction::Update,
            ..
        }
    ));
    assert!(state(dir.path()).get("flaky").is_none());
    assert!(!dir.path().join("flaky.txt").exists());
    assert_eq!(uninstall_count("flaky"), 1);
}

#[test]
fn panicking_recipe_is_an_internal_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = run(
        dir.path(),
        "[buildout]\nparts = crash\n\n[crash]\nrecipe = test-recipes:touch\npath = crash.txt\npanic = yes\n",
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.trace().is_some_and(|t| t.contains("touch exploded")));
    assert!(!dir.path().join("crash.txt").exists());
    assert!(state(dir.path()).is_empty());
}

#[test]
fn missing_recipe_distribution_stops_before_any_part() {
    let dir = tempfile::tempdir().unwrap();
    let err = run(
        dir.path(),
        "[buildout]\nparts = first foo\n\n\
         [first]\nrecipe = test-recipes:touch\npath = first.txt\n\n\
         [foo]\nrecipe = foo:x\n",
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingDistribution);
    assert!(!dir.path().join("first.txt").exists());
    assert!(state(dir.path()).is_empty());
}

#[test]
fn removed_part_is_uninstalled_once() {
    let dir = tempfile::tempdir().unwrap();
    run(
        dir.path(),
        "[buildout]\nparts = keep drop\n\n\
         [keep]\nrecipe = test-recipes:touch\npath = keep.txt\n\n\
         [drop]\nrecipe = test-recipes:touch\npath = drop.txt\n",
    )
    .unwrap();

    let cfg = "[buildout]\nparts = keep\n\n[keep]\nrecipe = test-recipes:touch\npath = keep.txt\n";
    let report = run(dir.path(), cfg).unwrap();
    assert_eq!(report.outcome("drop"), Some(Outcome::Uninstalled));
    assert_eq!(report.outcome("keep"), Some(Outcome::Unchanged));
    assert!(!dir.path().join("drop.txt").exists());
    assert_eq!(state(dir.path()).names(), vec!["keep"]);

    run(dir.path(), cfg).unwrap();
    assert_eq!(uninstall_count("drop"), 1);
    assert_eq!(uninstall_count("keep"), 0);
}

#[test]
fn selected_parts_leave_others_alone() {
    let dir = tempfile::tempdir().unwrap();
    let data = ConfigLoader::new()
        .with_facts(EnvironmentFacts::empty())
        .load_str(
            "[buildout]\nparts = a b\n\n\
             [a]\nrecipe = test-recipes:touch\npath = a.txt\n\n\
             [b]\nrecipe = test-recipes:touch\npath = b.txt\n",
            dir.path(),
        )
        .unwrap();
    let config = ConfigResolver::new(data);
    let registry = registry();
    let report = Engine::new(&config, &registry)
        .unwrap()
        .apply(&["b".to_owned()])
        .unwrap();
    assert_eq!(report.parts.len(), 1);
    assert!(dir.path().join("b.txt").exists());
    assert!(!dir.path().join("a.txt").exists());
    assert_eq!(state(dir.path()).names(), vec!["b"]);
}

#[test]
fn interrupted_operation_is_rolled_back_on_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let layout = BuildoutLayout::new(dir.path());
    let journal = Journal::new(&layout);
    let op = journal.begin(JournalAction::Install, "half").unwrap();
    let leftover = dir.path().join("half-built");
    fs::create_dir_all(leftover.join("lib")).unwrap();
    journal
        .add_rollback_step(&op, RollbackStep::RemovePath(leftover.clone()))
        .unwrap();

    let report = run(
        dir.path(),
        "[buildout]\nparts = fresh\n\n[fresh]\nrecipe = test-recipes:touch\npath = fresh.txt\n",
    )
    .unwrap();
    assert_eq!(report.recovered, 1);
    assert!(!leftover.exists());
    assert!(journal.list_incomplete().unwrap().is_empty());
}

#[test]
fn builtin_dists_recipe_records_the_working_set() {
    let dir = tempfile::tempdir().unwrap();
    let report = run(
        dir.path(),
        "[buildout]\nparts = env\n\n[env]\nrecipe = buildout-recipes:dists\ndists = test-recipes\n",
    )
    .unwrap();
    assert_eq!(report.outcome("env"), Some(Outcome::Installed));
    let listing = fs::read_to_string(dir.path().join("parts/env/dists.txt")).unwrap();
    assert!(listing.starts_with("test-recipes 1.0"), "{listing}");
    let record = state(dir.path()).get("env").cloned().unwrap();
    assert_eq!(record.options["resolved"], "test-recipes==1.0");
}
