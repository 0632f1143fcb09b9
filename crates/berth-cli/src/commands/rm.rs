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
        "removing packages...",
        "packages removed",
        "remove failed",
        || open.engine.remove(packages),
    )?;

    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }
    for name in &report.missing {
        println!("{name} is not declared in this project");
    }
    for name in &report.removed {
        println!("removed {name}");
    }
    if let Some(ref reconcile) = report.reconcile {
        print_reconcile(reconcile);
    }
    Ok(EXIT_SUCCESS)
}
