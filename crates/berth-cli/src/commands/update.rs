use super::{json_pretty, open_project, print_reconcile, with_spinner, EXIT_SUCCESS};
use berth_core::CancelToken;
use std::path::Path;

pub fn run(
    project: &Path,
    packages: &[String],
    cancel: &CancelToken,
    json: bool,
) -> Result<u8, String> {
    let mut open = open_project(project, cancel, true)?;
    let report = with_spinner(
        json,
        "updating packages...",
        "packages updated",
        "update failed",
        || open.engine.update(packages),
    )?;

    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }
    if report.changes.is_empty() {
        println!("no version changes");
    }
    for change in &report.changes {
        println!("{}: {} -> {}", change.name, change.from, change.to);
    }
    print_reconcile(&report.reconcile);
    Ok(EXIT_SUCCESS)
}
