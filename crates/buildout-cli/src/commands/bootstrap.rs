use super::{json_pretty, GlobalOptions, EXIT_SUCCESS};
use buildout_core::BuildoutSettings;

pub fn run(opts: &GlobalOptions) -> Result<u8, String> {
    let config = opts.load_config()?;
    let settings = BuildoutSettings::from_config(&config).map_err(|e| e.to_string())?;
    let layout = &settings.layout;
    let created = layout
        .initialize()
        .map_err(|e| format!("failed to create directories: {e}"))?;

    if opts.json {
        let payload = serde_json::json!({
            "directory": layout.directory(),
            "directories": layout.standard_dirs(),
            "created": created,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for dir in layout.standard_dirs() {
            let note = if created.iter().any(|c| c == dir) {
                "created"
            } else {
                "exists"
            };
            println!("{note:<8} {}", dir.display());
        }
    }
    Ok(EXIT_SUCCESS)
}
