use super::{
    colorize_outcome, describe, json_pretty, spin_fail, spin_ok, spinner, GlobalOptions,
    EXIT_SUCCESS,
};
use buildout_core::{Engine, RecipeRegistry};
use std::io::{stderr, IsTerminal};

pub fn run(opts: &GlobalOptions, parts: &[String]) -> Result<u8, String> {
    let config = opts.load_config()?;
    let registry = RecipeRegistry::with_builtins().map_err(|e| describe(&e))?;
    let mut engine = Engine::new(&config, &registry).map_err(|e| describe(&e))?;

    let pb = (!opts.json && stderr().is_terminal()).then(|| spinner("applying buildout..."));
    let report = match engine.apply(parts) {
        Ok(report) => {
            if let Some(pb) = &pb {
                spin_ok(pb, "buildout applied");
            }
            report
        }
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "buildout failed");
            }
            return Err(describe(&e));
        }
    };

    if opts.json {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }

    if report.recovered > 0 {
        println!("rolled back {} interrupted operation(s)", report.recovered);
    }
    for part in &report.parts {
        println!("{} {}", colorize_outcome(part.outcome), part.part);
    }
    if report.parts.is_empty() {
        println!("no parts to install");
    }
    if engine.settings().show_picked_versions && !report.picked.is_empty() {
        println!("\n[versions]");
        for (project, version) in &report.picked {
            println!("{project} = {version}");
        }
    }
    Ok(EXIT_SUCCESS)
}
