use crate::StoreError;
use berth_schema::CONFIG_FILE_NAME;
use std::fs;
use std::path::{Path, PathBuf};

pub const LOCKFILE_NAME: &str = "berth.lock";
const STATE_DIR: &str = ".berth";
const GITIGNORE: &str = ".gitignore";

/// Directory layout of a berth project.
///
/// The config and lockfile live at the project root; everything else is
/// local, regenerable state under `.berth/`, created lazily on
/// [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    #[inline]
    pub fn lockfile_path(&self) -> PathBuf {
        self.root.join(LOCKFILE_NAME)
    }

    #[inline]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Ephemeral up-to-date signature; safe to delete at any time.
    #[inline]
    pub fn local_lock_path(&self) -> PathBuf {
        self.state_dir().join("local.lock")
    }

    /// Host profile managed by the package manager.
    #[inline]
    pub fn profile_dir(&self) -> PathBuf {
        self.state_dir().join("nix").join("profile").join("default")
    }

    /// Per-package plugin directories.
    #[inline]
    pub fn virtenv_dir(&self) -> PathBuf {
        self.state_dir().join("virtenv")
    }

    /// Generated environment definition consumed by the package manager.
    #[inline]
    pub fn gen_dir(&self) -> PathBuf {
        self.state_dir().join("gen")
    }

    /// Install root for externally managed release binaries.
    #[inline]
    pub fn release_dir(&self) -> PathBuf {
        self.state_dir().join("releases")
    }

    #[inline]
    pub fn flock_path(&self) -> PathBuf {
        self.state_dir().join(".flock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.state_dir())?;
        let gitignore = self.state_dir().join(GITIGNORE);
        if !gitignore.exists() {
            berth_schema::write_atomic(&gitignore, b"*\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = ProjectLayout::new("/tmp/berth-test");
        assert_eq!(
            layout.config_path(),
            PathBuf::from("/tmp/berth-test/berth.toml")
        );
        assert_eq!(
            layout.lockfile_path(),
            PathBuf::from("/tmp/berth-test/berth.lock")
        );
        assert_eq!(
            layout.local_lock_path(),
            PathBuf::from("/tmp/berth-test/.berth/local.lock")
        );
        assert_eq!(
            layout.profile_dir(),
            PathBuf::from("/tmp/berth-test/.berth/nix/profile/default")
        );
        assert_eq!(
            layout.virtenv_dir(),
            PathBuf::from("/tmp/berth-test/.berth/virtenv")
        );
    }

    #[test]
    fn initialize_creates_state_dir_and_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        layout.initialize().unwrap();
        assert!(layout.state_dir().is_dir());
        let ignore = fs::read_to_string(layout.state_dir().join(GITIGNORE)).unwrap();
        assert_eq!(ignore, "*\n");
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        assert!(layout.state_dir().is_dir());
    }
}
