use super::{json_pretty, open_project, EXIT_FAILURE, EXIT_SUCCESS};
use berth_core::CancelToken;
use std::path::Path;

pub fn run(project: &Path, package: &str, json: bool) -> Result<u8, String> {
    let open = open_project(project, &CancelToken::new(), false)?;
    let info = open.engine.info(package).map_err(|e| e.to_string())?;
    let Some(info) = info else {
        if json {
            println!("{}", json_pretty(&serde_json::json!({ "name": package, "found": false }))?);
        } else {
            eprintln!("package {package} not found in the index");
        }
        return Ok(EXIT_FAILURE);
    };
    if json {
        println!("{}", json_pretty(&info)?);
    } else {
        println!("{}", info.name);
        for v in &info.versions {
            if v.last_updated.is_empty() {
                println!("  {}", v.version);
            } else {
                println!("  {:<16} {}", v.version, v.last_updated);
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
