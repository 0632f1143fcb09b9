pub mod add;
pub mod completions;
pub mod info;
pub mod install;
pub mod list;
pub mod man_pages;
pub mod rm;
pub mod update;

use berth_core::{
    CancelToken, Collaborators, Engine, EngineOptions, EnvContext, ProcessState, ProjectLock,
    ReconcileReport,
};
use berth_remote::{
    BinaryCache, GithubReleaseInstaller, HttpBinaryCache, HttpIndex, InMemoryCache, InMemoryIndex,
    PackageIndex, RecordingInstaller, ReleaseInstaller, RemoteConfig,
};
use berth_runtime::{select_backend, BuiltinPlugins, FlakeGenerator, PackageManager};
use berth_store::ProjectLayout;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_INSTALL_ERROR: u8 = 4;
pub const EXIT_CANCELLED: u8 = 130;

const DEFAULT_BACKEND: &str = "nix";

pub fn backend_name() -> String {
    std::env::var("BERTH_BACKEND")
        .ok()
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| DEFAULT_BACKEND.to_owned())
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Run `op` under a spinner unless output is JSON.
pub fn with_spinner<T, E: ToString>(
    json: bool,
    msg: &str,
    done: &str,
    failed: &str,
    op: impl FnOnce() -> Result<T, E>,
) -> Result<T, String> {
    let pb = (!json).then(|| spinner(msg));
    match op() {
        Ok(v) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, done);
            }
            Ok(v)
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, failed);
            }
            Err(e.to_string())
        }
    }
}

pub fn colorize_status(enabled: bool, uninstallable: bool) -> String {
    use console::Style;
    if uninstallable {
        Style::new().red().apply_to("uninstallable").to_string()
    } else if enabled {
        Style::new().green().apply_to("enabled").to_string()
    } else {
        Style::new().dim().apply_to("excluded").to_string()
    }
}

/// Print what a reconciliation changed, followed by its warnings.
pub fn print_reconcile(report: &ReconcileReport) {
    if report.up_to_date {
        println!("already up to date");
    }
    for name in &report.releases_installed {
        println!("installed release {name}");
    }
    if !report.profile_installed.is_empty() {
        println!("installed {} into the profile", report.profile_installed.len());
    }
    if !report.profile_removed.is_empty() {
        println!("removed {} from the profile", report.profile_removed.len());
    }
    if !report.built.is_empty() {
        println!("built {}", report.built.join(", "));
    }
    for name in &report.marked_uninstallable {
        println!("skipping {name} on this platform");
    }
    for w in &report.warnings {
        let style = console::Style::new().yellow();
        eprintln!("{} {w}", style.apply_to("warning:"));
    }
}

fn collaborators() -> Result<Collaborators, String> {
    let backend = backend_name();
    let package_manager: Arc<dyn PackageManager> =
        Arc::from(select_backend(&backend).map_err(|e| e.to_string())?);
    let offline = backend == "mock";
    let config = RemoteConfig::load_default().map_err(|e| e.to_string())?;

    debug!("using {backend} backend on {}", package_manager.system());

    let index: Arc<dyn PackageIndex> = match std::env::var("BERTH_INDEX_FILE") {
        Ok(path) if !path.is_empty() => {
            debug!("serving the package index from {path}");
            Arc::new(InMemoryIndex::from_file(Path::new(&path)).map_err(|e| e.to_string())?)
        }
        _ => {
            debug!("package index at {}", config.search_url);
            Arc::new(HttpIndex::new(&config))
        }
    };
    let (cache, releases): (Arc<dyn BinaryCache>, Arc<dyn ReleaseInstaller>) = if offline {
        debug!("mock backend: binary cache and release downloads are disabled");
        (
            Arc::new(InMemoryCache::new()),
            Arc::new(RecordingInstaller::new()),
        )
    } else {
        (
            Arc::new(HttpBinaryCache::new(&config)),
            Arc::new(GithubReleaseInstaller::new(&config).with_system(&package_manager.system())),
        )
    };

    Ok(Collaborators {
        index,
        cache,
        releases,
        package_manager,
        plugins: Arc::new(BuiltinPlugins::new()),
        env_generator: Arc::new(FlakeGenerator::new()),
    })
}

/// An opened project. Holds the project lock for as long as it lives when
/// opened for writing.
pub struct OpenProject {
    pub engine: Engine,
    _lock: Option<ProjectLock>,
}

pub fn open_project(project: &Path, cancel: &CancelToken, write: bool) -> Result<OpenProject, String> {
    let lock = if write {
        let layout = ProjectLayout::new(project);
        let lock_path = layout.flock_path();
        if let Some(lock) =
            ProjectLock::try_acquire(&lock_path).map_err(|e| format!("project lock: {e}"))?
        {
            Some(lock)
        } else {
            warn!("waiting for another berth process on {}", project.display());
            Some(ProjectLock::acquire(&lock_path).map_err(|e| format!("project lock: {e}"))?)
        }
    } else {
        None
    };
    let options = EngineOptions {
        context: EnvContext::detect(project),
        process: ProcessState::shared(),
        cancel: cancel.clone(),
    };
    let engine = Engine::open(project, collaborators()?, options).map_err(|e| e.to_string())?;
    Ok(OpenProject {
        engine,
        _lock: lock,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_report() {
        let report = ReconcileReport {
            up_to_date: true,
            ..ReconcileReport::default()
        };
        let result = json_pretty(&report).unwrap();
        assert!(result.contains("\"up_to_date\": true"));
    }

    #[test]
    fn colorize_status_keeps_label() {
        assert!(colorize_status(true, false).contains("enabled"));
        assert!(colorize_status(false, false).contains("excluded"));
        assert!(colorize_status(true, true).contains("uninstallable"));
    }

    #[test]
    fn with_spinner_maps_errors_to_strings() {
        let err = with_spinner(true, "working", "done", "failed", || {
            Err::<(), _>(std::io::Error::other("boom"))
        })
        .unwrap_err();
        assert_eq!(err, "boom");
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_FAILURE,
            EXIT_CONFIG_ERROR,
            EXIT_STORE_ERROR,
            EXIT_INSTALL_ERROR,
            EXIT_CANCELLED,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
