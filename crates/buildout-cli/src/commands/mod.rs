pub mod apply;
pub mod bootstrap;
pub mod init;
pub mod inspect;

use buildout_config::{
    default_user_defaults_path, ConfigLoader, ConfigResolver, EnvironmentFacts, Override,
};
use buildout_core::{CoreError, ErrorKind, Outcome};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;

/// Flags shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub config: PathBuf,
    pub overrides: Vec<Override>,
    pub user_defaults: bool,
    pub json: bool,
}

impl GlobalOptions {
    pub fn new(
        config: PathBuf,
        assignments: &[String],
        user_defaults: bool,
        json: bool,
    ) -> Result<Self, String> {
        let overrides = assignments
            .iter()
            .map(|a| a.parse::<Override>().map_err(|e| e.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            overrides,
            user_defaults,
            json,
        })
    }

    /// Load the configuration file with user defaults and overrides layered
    /// in.
    pub fn load_config(&self) -> Result<ConfigResolver, String> {
        let user_defaults = if self.user_defaults {
            default_user_defaults_path()
        } else {
            None
        };
        let data = ConfigLoader::new()
            .with_facts(EnvironmentFacts::detect())
            .with_user_defaults(user_defaults)
            .with_overrides(self.overrides.clone())
            .load(&self.config)
            .map_err(|e| format!("configuration error: {e}"))?;
        Ok(ConfigResolver::new(data))
    }
}

/// Message for a failed run. Internal errors carry the recipe's backtrace.
pub fn describe(err: &CoreError) -> String {
    let mut msg = match err.kind() {
        ErrorKind::Configuration | ErrorKind::State => err.to_string(),
        kind => format!("{kind}: {err}"),
    };
    if let Some(trace) = err.trace() {
        msg.push('\n');
        msg.push_str(trace);
    }
    msg
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

pub fn colorize_outcome(outcome: Outcome) -> String {
    use console::Style;
    let text = format!("{outcome:<11}");
    match outcome {
        Outcome::Installed => Style::new().green().apply_to(text).to_string(),
        Outcome::Updated => Style::new().cyan().apply_to(text).to_string(),
        Outcome::Uninstalled => Style::new().yellow().apply_to(text).to_string(),
        Outcome::Unchanged => Style::new().dim().apply_to(text).to_string(),
    }
}
