use super::{colorize_status, json_pretty, open_project, EXIT_SUCCESS};
use berth_core::CancelToken;
use std::path::Path;

pub fn run(project: &Path, json: bool) -> Result<u8, String> {
    let open = open_project(project, &CancelToken::new(), false)?;
    let entries = open.engine.list();
    if json {
        println!("{}", json_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("no packages declared");
    } else {
        println!("{:<28} {:<14} {:<14} LOCATOR", "NAME", "VERSION", "STATUS");
        for e in &entries {
            println!(
                "{:<28} {:<14} {:<14} {}",
                e.name,
                e.version.as_deref().unwrap_or("-"),
                colorize_status(e.enabled, e.uninstallable),
                e.locator.as_deref().unwrap_or("")
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
