use crate::layout::ProjectLayout;
use crate::local::LocalState;
use crate::lockfile::{LockedPackage, Lockfile};
use crate::StoreError;
use berth_schema::ContentHash;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// The lockfile of one project plus its ephemeral up-to-date signature.
///
/// The lockfile is read once in [`open`](Self::open) and written only by
/// [`save`](Self::save); every other method mutates the in-memory copy.
#[derive(Debug)]
pub struct StateStore {
    layout: ProjectLayout,
    lockfile: Lockfile,
}

impl StateStore {
    pub fn open(layout: ProjectLayout) -> Result<Self, StoreError> {
        let lockfile = Lockfile::read_from_file(layout.lockfile_path())?;
        debug!(
            "loaded {} lockfile entries from {}",
            lockfile.len(),
            layout.lockfile_path().display()
        );
        Ok(Self { layout, lockfile })
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn lockfile(&self) -> &Lockfile {
        &self.lockfile
    }

    pub fn lockfile_mut(&mut self) -> &mut Lockfile {
        &mut self.lockfile
    }

    /// Swap the in-memory lockfile, returning the previous one.
    pub fn replace_lockfile(&mut self, lockfile: Lockfile) -> Lockfile {
        std::mem::replace(&mut self.lockfile, lockfile)
    }

    /// True when the last successful run recorded the same declared content,
    /// the same lockfile and the same tool version.
    pub fn is_up_to_date_and_installed(
        &self,
        config_hash: &ContentHash,
    ) -> Result<bool, StoreError> {
        let Some(local) = LocalState::read(self.layout.local_lock_path())? else {
            return Ok(false);
        };
        Ok(local.matches(config_hash, &self.lockfile.content_hash()?))
    }

    pub fn tidy(&mut self, declared: &[&str]) -> Vec<String> {
        self.lockfile.tidy(declared)
    }

    pub fn ensure_uninstallable<E>(
        &mut self,
        raw: &str,
        resolve: impl FnOnce() -> Result<LockedPackage, E>,
    ) -> Result<bool, E> {
        self.lockfile.ensure_uninstallable(raw, resolve)
    }

    /// Drop the up-to-date signature only; `berth.lock` is left alone.
    pub fn remove_local(&self) -> Result<(), StoreError> {
        LocalState::remove(self.layout.local_lock_path())
    }

    /// Guard that drops the up-to-date signature when it goes out of scope.
    pub fn local_cleanup(&self) -> LocalStateCleanup {
        LocalStateCleanup {
            path: self.layout.local_lock_path(),
        }
    }

    /// Commit `berth.lock`, then record the signature that makes the next
    /// unchanged run a no-op.
    pub fn save(&self, config_hash: &ContentHash) -> Result<(), StoreError> {
        self.lockfile.write_to_file(self.layout.lockfile_path())?;
        let local = LocalState::new(config_hash.clone(), self.lockfile.content_hash()?);
        local.write(self.layout.local_lock_path())?;
        info!("saved {} ({} packages)", self.layout.lockfile_path().display(), self.lockfile.len());
        Ok(())
    }
}

/// Removes `.berth/local.lock` on drop, on success and error paths alike.
#[derive(Debug)]
#[must_use = "the signature is removed when the guard is dropped"]
pub struct LocalStateCleanup {
    path: PathBuf,
}

impl Drop for LocalStateCleanup {
    fn drop(&mut self) {
        if let Err(e) = LocalState::remove(&self.path) {
            warn!("failed to remove {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockfile::ResolutionSource;

    fn store(dir: &tempfile::TempDir) -> StateStore {
        let layout = ProjectLayout::new(dir.path());
        layout.initialize().unwrap();
        StateStore::open(layout).unwrap()
    }

    fn entry() -> LockedPackage {
        LockedPackage::new("github:NixOS/nixpkgs/abc#hello", ResolutionSource::Search)
    }

    #[test]
    fn fresh_project_is_not_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        assert!(!s.is_up_to_date_and_installed(&ContentHash::of(b"cfg")).unwrap());
    }

    #[test]
    fn save_makes_project_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store(&dir);
        s.lockfile_mut().insert("hello@latest", entry());
        let cfg = ContentHash::of(b"cfg");
        s.save(&cfg).unwrap();
        assert!(s.is_up_to_date_and_installed(&cfg).unwrap());
        assert!(!s
            .is_up_to_date_and_installed(&ContentHash::of(b"changed"))
            .unwrap());

        let reopened = StateStore::open(ProjectLayout::new(dir.path())).unwrap();
        assert!(reopened.lockfile().contains("hello@latest"));
        assert!(reopened.is_up_to_date_and_installed(&cfg).unwrap());
    }

    #[test]
    fn in_memory_lockfile_change_invalidates_signature() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store(&dir);
        let cfg = ContentHash::of(b"cfg");
        s.save(&cfg).unwrap();
        s.lockfile_mut().insert("hello@latest", entry());
        assert!(!s.is_up_to_date_and_installed(&cfg).unwrap());
    }

    #[test]
    fn remove_local_keeps_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store(&dir);
        s.lockfile_mut().insert("hello@latest", entry());
        let cfg = ContentHash::of(b"cfg");
        s.save(&cfg).unwrap();
        s.remove_local().unwrap();
        assert!(!s.is_up_to_date_and_installed(&cfg).unwrap());
        assert!(s.layout().lockfile_path().exists());
        assert!(!s.layout().local_lock_path().exists());
    }

    #[test]
    fn unsaved_mutations_never_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store(&dir);
        s.lockfile_mut().insert("hello@latest", entry());
        s.tidy(&[]);
        assert!(!s.layout().lockfile_path().exists());
    }

    #[test]
    fn replace_lockfile_returns_previous() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store(&dir);
        s.lockfile_mut().insert("hello@latest", entry());
        let old = s.replace_lockfile(Lockfile::default());
        assert!(old.contains("hello@latest"));
        assert!(s.lockfile().is_empty());
    }

    #[test]
    fn cleanup_guard_removes_signature_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let cfg = ContentHash::of(b"cfg");
        {
            let _cleanup = s.local_cleanup();
            s.save(&cfg).unwrap();
            assert!(s.layout().local_lock_path().exists());
        }
        assert!(!s.layout().local_lock_path().exists());
        assert!(s.layout().lockfile_path().exists());
    }

    #[test]
    fn cleanup_guard_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        drop(s.local_cleanup());
        assert!(!s.layout().local_lock_path().exists());
    }
}
