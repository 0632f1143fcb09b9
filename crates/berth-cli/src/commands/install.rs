use super::{json_pretty, open_project, print_reconcile, with_spinner, EXIT_SUCCESS};
use berth_core::CancelToken;
use std::path::Path;

pub fn run(project: &Path, cancel: &CancelToken, json: bool) -> Result<u8, String> {
    let mut open = open_project(project, cancel, true)?;
    let report = with_spinner(
        json,
        "installing packages...",
        "packages installed",
        "install failed",
        || open.engine.install(),
    )?;
    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_reconcile(&report);
    }
    Ok(EXIT_SUCCESS)
}
