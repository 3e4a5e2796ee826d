use super::{json_pretty, GlobalOptions, EXIT_SUCCESS};
use buildout_config::{annotate, render, ConfigResolver};
use buildout_core::BuildoutSettings;
use buildout_store::InstalledState;

fn load_state(config: &ConfigResolver) -> Result<InstalledState, String> {
    let settings = BuildoutSettings::from_config(config).map_err(|e| e.to_string())?;
    InstalledState::load(&settings.layout.installed_file).map_err(|e| format!("state error: {e}"))
}

fn print_state(state: &InstalledState) {
    if state.is_empty() {
        println!("no installed parts");
        return;
    }
    for record in state.iter() {
        println!("[{}]", record.name);
        println!("recipe:    {}", record.recipe().unwrap_or("(none)"));
        println!("signature: {}", record.signature);
        for path in &record.paths {
            println!("  {}", path.display());
        }
    }
}

pub fn run(opts: &GlobalOptions, show_config: bool, show_state: bool) -> Result<u8, String> {
    let show_state = show_state || !show_config;
    let config = opts.load_config()?;

    let annotated = if show_config {
        Some(annotate(&config).map_err(|e| format!("configuration error: {e}"))?)
    } else {
        None
    };
    let state = if show_state {
        Some(load_state(&config)?)
    } else {
        None
    };

    if opts.json {
        let payload = serde_json::json!({
            "config": annotated,
            "state": state,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    if let Some(annotated) = &annotated {
        print!("{}", render(annotated));
    }
    if let Some(state) = &state {
        if annotated.is_some() {
            println!();
        }
        print_state(state);
    }
    Ok(EXIT_SUCCESS)
}
