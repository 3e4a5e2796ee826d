use super::create_dir_tracked;
use crate::recipe::{Recipe, RecipeContext, RecipeError, RecipeSetup};
use buildout_resolve::Requirement;
use std::fs;
use std::path::PathBuf;

const MANIFEST: &str = "dists.txt";

struct Dists {
    part_dir: PathBuf,
    lines: Vec<String>,
}

pub(super) fn create(setup: &mut RecipeSetup<'_>) -> Result<Box<dyn Recipe>, RecipeError> {
    let options = setup.options();
    let requirements = options
        .require("dists")?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(Requirement::parse)
        .collect::<Result<Vec<_>, _>>()?;

    let resolution = setup.resolve(&requirements)?;
    let mut resolved = Vec::new();
    let mut lines = Vec::new();
    for dist in &resolution.working_set {
        resolved.push(format!("{}=={}", dist.project, dist.version));
        lines.push(format!("{} {} {}", dist.project, dist.version, dist.location));
    }
    options.set("resolved", resolved.join("\n"));

    Ok(Box::new(Dists {
        part_dir: setup.layout().part_dir(setup.part()),
        lines,
    }))
}

impl Dists {
    fn write(&self, ctx: &mut RecipeContext<'_>) -> Result<Vec<PathBuf>, RecipeError> {
        // The parts directory is shared; only the part's own directory is ours.
        fs::create_dir_all(&ctx.layout().parts_directory)?;
        create_dir_tracked(ctx, &self.part_dir)?;
        let manifest = self.part_dir.join(MANIFEST);
        if !manifest.exists() {
            ctx.created(&manifest)?;
        }
        let mut text = self.lines.join("\n");
        text.push('\n');
        fs::write(&manifest, text)?;
        Ok(vec![self.part_dir.clone()])
    }
}

impl Recipe for Dists {
    fn install(&mut self, ctx: &mut RecipeContext<'_>) -> Result<Vec<PathBuf>, RecipeError> {
        self.write(ctx)
    }

    fn has_update(&self) -> bool {
        true
    }

    fn update(&mut self, ctx: &mut RecipeContext<'_>) -> Result<Vec<PathBuf>, RecipeError> {
        self.write(ctx)
    }
}
