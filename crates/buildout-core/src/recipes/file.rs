use super::{create_dir_tracked, parse_mode, set_mode};
use crate::recipe::{Recipe, RecipeContext, RecipeError, RecipeSetup};
use std::fs;
use std::path::PathBuf;

struct WriteFile {
    output: PathBuf,
    content: String,
    mode: Option<u32>,
}

pub(super) fn create(setup: &mut RecipeSetup<'_>) -> Result<Box<dyn Recipe>, RecipeError> {
    let options = setup.options();
    let output = setup.path(&options.require("output")?);
    let content = options.get_or("content", "")?;
    let mode = parse_mode(options.get("mode")?)?;
    options.set("output", output.to_string_lossy().into_owned());
    Ok(Box::new(WriteFile {
        output,
        content,
        mode,
    }))
}

// No distinct update: a changed file is simply written again.
impl Recipe for WriteFile {
    fn install(&mut self, ctx: &mut RecipeContext<'_>) -> Result<Vec<PathBuf>, RecipeError> {
        let mut paths = Vec::new();
        if let Some(parent) = self.output.parent() {
            paths.extend(create_dir_tracked(ctx, parent)?);
        }
        if !self.output.exists() {
            ctx.created(&self.output)?;
        }
        fs::write(&self.output, &self.content)?;
        if let Some(mode) = self.mode {
            set_mode(&self.output, mode)?;
        }
        paths.push(self.output.clone());
        Ok(paths)
    }
}
