use crate::CoreError;
use buildout_config::{expand_tilde, ConfigResolver, Section};
use buildout_resolve::{parse_pin, Pins, ResolverPolicy};
use buildout_store::BuildoutLayout;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Run-wide settings read once from the `[buildout]` section.
#[derive(Debug, Clone)]
pub struct BuildoutSettings {
    pub layout: BuildoutLayout,
    pub policy: ResolverPolicy,
    pub pins: Pins,
    pub parts: Vec<String>,
    pub develop: Vec<PathBuf>,
    pub find_links: Vec<String>,
    pub show_picked_versions: bool,
}

impl BuildoutSettings {
    pub fn from_config(config: &ConfigResolver) -> Result<Self, CoreError> {
        let buildout = config.buildout()?;
        let directory = PathBuf::from(buildout.require("directory")?);
        let dir_option = |key: &str| -> Result<PathBuf, CoreError> {
            Ok(absolute_in(&directory, &buildout.require(key)?))
        };

        let mut layout = BuildoutLayout::new(&directory);
        layout.parts_directory = dir_option("parts-directory")?;
        layout.bin_directory = dir_option("bin-directory")?;
        layout.eggs_directory = dir_option("eggs-directory")?;
        layout.develop_eggs_directory = dir_option("develop-eggs-directory")?;
        layout.installed_file = dir_option("installed")?;

        let policy = ResolverPolicy {
            prefer_final: buildout.get_bool("prefer-final", true)?,
            newest: buildout.get_bool("newest", true)?,
            offline: buildout.get_bool("offline", false)?,
            allow_picked_versions: buildout.get_bool("allow-picked-versions", true)?,
            use_dependency_links: buildout.get_bool("use-dependency-links", true)?,
            ..ResolverPolicy::default()
        };

        let develop = buildout
            .get_list("develop")?
            .iter()
            .map(|d| absolute_in(&directory, d))
            .collect();
        let find_links = buildout
            .get_list("find-links")?
            .into_iter()
            .map(|link| {
                if link.contains("://") {
                    link
                } else {
                    absolute_in(&directory, &link).to_string_lossy().into_owned()
                }
            })
            .collect();

        let versions = buildout.get_or("versions", "versions")?;
        let pins = if config.has_section(&versions) {
            read_pins(config.section(&versions)?)?
        } else {
            Pins::new()
        };

        Ok(Self {
            layout,
            policy,
            pins,
            parts: buildout.get_list("parts")?,
            develop,
            find_links,
            show_picked_versions: buildout.get_bool("show-picked-versions", false)?,
        })
    }
}

fn read_pins(section: Section<'_>) -> Result<Pins, CoreError> {
    let mut pins = Pins::new();
    for (project, value) in section.snapshot()? {
        let specs = parse_pin(&value)?;
        if !specs.is_empty() {
            debug!("pin {project} {value}");
            pins.insert(&project, specs);
        }
    }
    Ok(pins)
}

fn absolute_in(base: &Path, value: &str) -> PathBuf {
    let path = expand_tilde(value.trim());
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
