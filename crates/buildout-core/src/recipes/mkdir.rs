use super::{create_dir_tracked, parse_mode, set_mode};
use crate::recipe::{Recipe, RecipeContext, RecipeError, RecipeSetup};
use std::path::PathBuf;
use tracing::debug;

struct Mkdir {
    paths: Vec<PathBuf>,
    mode: Option<u32>,
}

pub(super) fn create(setup: &mut RecipeSetup<'_>) -> Result<Box<dyn Recipe>, RecipeError> {
    let options = setup.options();
    let paths: Vec<PathBuf> = options
        .require("paths")?
        .split_whitespace()
        .map(|p| setup.path(p))
        .collect();
    let mode = parse_mode(options.get("mode")?)?;

    let normalized: Vec<String> = paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    options.set("paths", normalized.join("\n"));
    Ok(Box::new(Mkdir { paths, mode }))
}

impl Mkdir {
    fn ensure(&self, ctx: &mut RecipeContext<'_>) -> Result<Vec<PathBuf>, RecipeError> {
        let mut made = Vec::new();
        for path in &self.paths {
            if let Some(top) = create_dir_tracked(ctx, path)? {
                debug!("{}: created {}", ctx.part(), path.display());
                made.push(top);
            } else if !path.is_dir() {
                return Err(RecipeError::Failed(format!(
                    "{} exists and is not a directory",
                    path.display()
                )));
            }
            if let Some(mode) = self.mode {
                set_mode(path, mode)?;
            }
        }
        Ok(made)
    }
}

impl Recipe for Mkdir {
    fn install(&mut self, ctx: &mut RecipeContext<'_>) -> Result<Vec<PathBuf>, RecipeError> {
        self.ensure(ctx)
    }

    fn has_update(&self) -> bool {
        true
    }

    /// Recreate directories that went missing and reapply the mode.
    fn update(&mut self, ctx: &mut RecipeContext<'_>) -> Result<Vec<PathBuf>, RecipeError> {
        self.ensure(ctx)
    }
}
