use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Set by an activated berth shell to the project it belongs to.
pub const SHELL_PROJECT_VAR: &str = "BERTH_SHELL_PROJECT";
/// Set by direnv inside a directory it manages.
pub const DIRENV_VAR: &str = "DIRENV_DIR";

/// How the engine was invoked relative to an activated environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvContext {
    /// A shell for this project is active in the calling process.
    pub session_active: bool,
    /// Something reloads the environment on change (direnv).
    pub auto_reload_active: bool,
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

impl EnvContext {
    pub fn detect(project_dir: &Path) -> Self {
        Self::from_vars(
            project_dir,
            std::env::var(SHELL_PROJECT_VAR).ok().as_deref(),
            std::env::var(DIRENV_VAR).ok().as_deref(),
        )
    }

    pub fn from_vars(project_dir: &Path, shell_project: Option<&str>, direnv: Option<&str>) -> Self {
        let session_active = shell_project
            .filter(|p| !p.is_empty())
            .is_some_and(|p| same_dir(Path::new(p), project_dir));
        let auto_reload_active = direnv.is_some_and(|d| !d.is_empty());
        Self {
            session_active,
            auto_reload_active,
        }
    }
}

/// Process-lifetime state shared by every engine in the process.
#[derive(Debug, Default)]
pub struct ProcessState {
    profile_reset_done: AtomicBool,
}

static SHARED: OnceLock<Arc<ProcessState>> = OnceLock::new();

impl ProcessState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new())))
    }

    pub fn profile_reset_done(&self) -> bool {
        self.profile_reset_done.load(Ordering::SeqCst)
    }

    /// Remove a profile directory still in the pre-flake layout (it holds a
    /// `manifest.nix`). Runs at most once per process. A failed removal is
    /// logged and leaves the guard unset, so the next call retries.
    pub fn reset_profile_dir_once(&self, profile_dir: &Path) {
        if self.profile_reset_done() {
            return;
        }
        match reset_legacy_profile(profile_dir) {
            Ok(()) => self.profile_reset_done.store(true, Ordering::SeqCst),
            Err(e) => warn!(
                "failed to reset legacy profile at {}: {e}",
                profile_dir.display()
            ),
        }
    }
}

fn reset_legacy_profile(profile_dir: &Path) -> std::io::Result<()> {
    if !profile_dir.join("manifest.nix").exists() {
        debug!("profile at {} needs no reset", profile_dir.display());
        return Ok(());
    }
    info!("resetting legacy profile at {}", profile_dir.display());
    let meta = std::fs::symlink_metadata(profile_dir)?;
    if meta.file_type().is_symlink() {
        std::fs::remove_file(profile_dir)
    } else {
        std::fs::remove_dir_all(profile_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_requires_matching_project() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let here = dir.path().to_str().unwrap();
        assert!(EnvContext::from_vars(dir.path(), Some(here), None).session_active);
        assert!(
            !EnvContext::from_vars(other.path(), Some(here), None).session_active,
            "a shell of another project is not a session of this one"
        );
        assert!(!EnvContext::from_vars(dir.path(), Some(""), None).session_active);
        assert!(!EnvContext::from_vars(dir.path(), None, None).session_active);
    }

    #[test]
    fn direnv_marks_auto_reload() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EnvContext::from_vars(dir.path(), None, Some("-/home/x")).auto_reload_active);
        assert!(!EnvContext::from_vars(dir.path(), None, Some("")).auto_reload_active);
    }

    #[test]
    fn reset_removes_legacy_profile_once() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("profile");
        std::fs::create_dir_all(&profile).unwrap();
        std::fs::write(profile.join("manifest.nix"), "[]").unwrap();

        let state = ProcessState::new();
        state.reset_profile_dir_once(&profile);
        assert!(!profile.exists());
        assert!(state.profile_reset_done());

        std::fs::create_dir_all(&profile).unwrap();
        std::fs::write(profile.join("manifest.nix"), "[]").unwrap();
        state.reset_profile_dir_once(&profile);
        assert!(profile.exists(), "second call in the same process is a no-op");
    }

    #[test]
    fn reset_leaves_flake_profile_alone() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("profile");
        std::fs::create_dir_all(&profile).unwrap();
        std::fs::write(profile.join("manifest.json"), "{}").unwrap();
        let state = ProcessState::new();
        state.reset_profile_dir_once(&profile);
        assert!(profile.join("manifest.json").exists());
    }

    #[test]
    fn failed_reset_is_retried() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("profile");
        std::fs::create_dir_all(&profile).unwrap();
        std::fs::write(profile.join("manifest.nix"), "[]").unwrap();
        std::fs::set_permissions(&profile, std::fs::Permissions::from_mode(0o500)).unwrap();
        // Root ignores directory permissions.
        if std::fs::write(profile.join("write-check"), "").is_ok() {
            std::fs::set_permissions(&profile, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let state = ProcessState::new();
        state.reset_profile_dir_once(&profile);
        assert!(profile.join("manifest.nix").exists());
        assert!(!state.profile_reset_done(), "a failed reset must not set the guard");

        std::fs::set_permissions(&profile, std::fs::Permissions::from_mode(0o755)).unwrap();
        state.reset_profile_dir_once(&profile);
        assert!(!profile.exists());
        assert!(state.profile_reset_done());
    }

    #[test]
    fn shared_state_is_a_singleton() {
        assert!(Arc::ptr_eq(&ProcessState::shared(), &ProcessState::shared()));
    }
}
