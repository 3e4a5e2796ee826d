//! Recipes shipped with buildout, in the `buildout-recipes` distribution.
//!
//! - `mkdir` creates the directories listed in `paths`.
//! - `file` writes `content` to `output`.
//! - `dists` resolves the requirements in `dists` and writes the chosen
//!   working set to `<parts-directory>/<part>/dists.txt`.

mod dists;
mod file;
mod mkdir;

use crate::recipe::{RecipeContext, RecipeError, RecipeRegistry};
use crate::CoreError;
use buildout_resolve::Version;
use std::fs;
use std::path::{Path, PathBuf};

pub const DISTRIBUTION: &str = "buildout-recipes";

pub fn register(registry: &mut RecipeRegistry) -> Result<(), CoreError> {
    let version = Version::parse(env!("CARGO_PKG_VERSION"))?;
    registry.register(DISTRIBUTION, &version, "mkdir", mkdir::create);
    registry.register(DISTRIBUTION, &version, "file", file::create);
    registry.register(DISTRIBUTION, &version, "dists", dists::create);
    Ok(())
}

/// Create `dir` and any missing parents. The outermost directory that did
/// not exist is registered with `ctx` and returned.
fn create_dir_tracked(
    ctx: &mut RecipeContext<'_>,
    dir: &Path,
) -> Result<Option<PathBuf>, RecipeError> {
    let Some(top) = dir.ancestors().take_while(|a| !a.exists()).last() else {
        return Ok(None);
    };
    let top = top.to_path_buf();
    ctx.created(&top)?;
    fs::create_dir_all(dir)?;
    Ok(Some(top))
}

fn parse_mode(value: Option<String>) -> Result<Option<u32>, RecipeError> {
    value
        .map(|m| {
            u32::from_str_radix(m.trim(), 8)
                .map_err(|_| RecipeError::Failed(format!("invalid mode '{m}', expected octal")))
        })
        .transpose()
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), RecipeError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), RecipeError> {
    Ok(())
}
