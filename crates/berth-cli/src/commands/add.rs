use super::{json_pretty, open_project, print_reconcile, with_spinner, EXIT_SUCCESS};
use berth_core::{AddOptions, CancelToken};
use std::path::Path;

pub fn run(
    project: &Path,
    packages: &[String],
    options: &AddOptions,
    cancel: &CancelToken,
    json: bool,
) -> Result<u8, String> {
    let mut open = open_project(project, cancel, true)?;
    let report = with_spinner(
        json,
        "adding packages...",
        "packages added",
        "add failed",
        || open.engine.add(packages, options),
    )?;

    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }
    for name in &report.unchanged {
        println!("{name} is already in the project");
    }
    for name in &report.replaced {
        println!("replaced {name}");
    }
    for name in &report.added {
        println!("added {name}");
    }
    print_reconcile(&report.reconcile);
    for (name, notes) in &report.readmes {
        println!();
        println!("{name} notes:");
        println!("{notes}");
    }
    Ok(EXIT_SUCCESS)
}
