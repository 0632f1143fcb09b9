//! In-memory collaborators for offline use and tests.

use crate::{
    BinaryCache, InstalledRelease, PackageIndex, PackageInfo, ReleaseInstaller, RemoteError,
    ResolvedVersion, VersionSummary,
};
use berth_schema::{StorePath, LATEST};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A package index served from memory.
///
/// Versions are kept in insertion order, oldest first; `latest` is the last
/// one. A query version matches exactly or as a dotted prefix (`1.21`
/// matches `1.21.5`).
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    packages: BTreeMap<String, Vec<ResolvedVersion>>,
    queries: AtomicUsize,
}

fn version_matches(candidate: &str, wanted: &str) -> bool {
    wanted == LATEST
        || candidate == wanted
        || candidate
            .strip_prefix(wanted)
            .is_some_and(|rest| rest.starts_with('.'))
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, version: ResolvedVersion) {
        self.packages
            .entry(version.name.clone())
            .or_default()
            .push(version);
    }

    #[must_use]
    pub fn with(mut self, version: ResolvedVersion) -> Self {
        self.insert(version);
        self
    }

    /// Load a JSON array of [`ResolvedVersion`]s.
    pub fn from_file(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path)?;
        let versions: Vec<ResolvedVersion> = serde_json::from_str(&content)
            .map_err(|e| RemoteError::Serialization(format!("{}: {e}", path.display())))?;
        let mut index = Self::new();
        for v in versions {
            index.insert(v);
        }
        Ok(index)
    }

    /// Number of `resolve` and `search` calls served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl PackageIndex for InMemoryIndex {
    fn resolve(&self, name: &str, version: &str) -> Result<Option<ResolvedVersion>, RemoteError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.packages.get(name).and_then(|versions| {
            versions
                .iter()
                .rev()
                .find(|v| version_matches(&v.version, version))
                .cloned()
        }))
    }

    fn search(&self, name: &str) -> Result<Option<PackageInfo>, RemoteError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.packages.get(name).map(|versions| PackageInfo {
            name: name.to_owned(),
            versions: versions
                .iter()
                .rev()
                .map(|v| VersionSummary {
                    version: v.version.clone(),
                    last_updated: v
                        .systems
                        .values()
                        .next()
                        .map(|b| b.last_updated.clone())
                        .unwrap_or_default(),
                })
                .collect(),
        }))
    }
}

/// A binary cache holding an explicit set of store paths.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    paths: Mutex<HashSet<StorePath>>,
    probes: AtomicUsize,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, path: StorePath) {
        if let Ok(mut paths) = self.paths.lock() {
            paths.insert(path);
        }
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl BinaryCache for InMemoryCache {
    fn has_store_path(&self, path: &StorePath) -> Result<bool, RemoteError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let paths = self
            .paths
            .lock()
            .map_err(|_| RemoteError::Http("cache lock poisoned".to_owned()))?;
        Ok(paths.contains(path))
    }
}

/// Release installer that writes a marker file instead of downloading.
#[derive(Debug, Default)]
pub struct RecordingInstaller {
    installed: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

impl RecordingInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make installs of `repo` fail.
    #[must_use]
    pub fn failing_on(mut self, repo: &str) -> Self {
        self.fail_on = Some(repo.to_owned());
        self
    }

    pub fn installed(&self) -> Vec<String> {
        self.installed.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl ReleaseInstaller for RecordingInstaller {
    fn install(
        &self,
        repo: &str,
        version: Option<&str>,
        dest: &Path,
    ) -> Result<InstalledRelease, RemoteError> {
        if self.fail_on.as_deref() == Some(repo) {
            return Err(RemoteError::NotFound(format!("{repo} release")));
        }
        let version = version.unwrap_or(LATEST).to_owned();
        let dir = dest.join(repo.replace('/', "_")).join(&version);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("installed");
        std::fs::write(&path, repo)?;
        if let Ok(mut installed) = self.installed.lock() {
            installed.push(repo.to_owned());
        }
        Ok(InstalledRelease { version, path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SystemBuild;

    fn version(name: &str, v: &str) -> ResolvedVersion {
        let mut systems = BTreeMap::new();
        systems.insert(
            "x86_64-linux".to_owned(),
            SystemBuild {
                flake_ref: "github:NixOS/nixpkgs/abc".to_owned(),
                attr_path: name.to_owned(),
                store_paths: vec![StorePath::new(format!("/nix/store/h{v}-{name}-{v}"))],
                last_updated: String::new(),
            },
        );
        ResolvedVersion {
            name: name.to_owned(),
            version: v.to_owned(),
            summary: String::new(),
            systems,
        }
    }

    #[test]
    fn resolve_prefix_and_latest() {
        let index = InMemoryIndex::new()
            .with(version("go", "1.20.3"))
            .with(version("go", "1.21.5"));
        assert_eq!(index.resolve("go", "1.20").unwrap().unwrap().version, "1.20.3");
        assert_eq!(index.resolve("go", "latest").unwrap().unwrap().version, "1.21.5");
        assert!(index.resolve("go", "1.2").unwrap().is_none());
        assert!(index.resolve("rust", "latest").unwrap().is_none());
        assert_eq!(index.query_count(), 4);
    }

    #[test]
    fn search_lists_newest_first() {
        let index = InMemoryIndex::new()
            .with(version("go", "1.20.3"))
            .with(version("go", "1.21.5"));
        let info = index.search("go").unwrap().unwrap();
        let versions: Vec<&str> = info.versions.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(versions, vec!["1.21.5", "1.20.3"]);
    }

    #[test]
    fn index_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let json = serde_json::to_string(&vec![version("jq", "1.7")]).unwrap();
        std::fs::write(&path, json).unwrap();
        let index = InMemoryIndex::from_file(&path).unwrap();
        assert!(index.resolve("jq", "1.7").unwrap().is_some());
    }

    #[test]
    fn cache_counts_probes() {
        let cache = InMemoryCache::new();
        cache.add(StorePath::new("/nix/store/aaa-go"));
        assert!(cache.has_store_path(&StorePath::new("/nix/store/aaa-go")).unwrap());
        assert!(!cache.has_store_path(&StorePath::new("/nix/store/bbb-jq")).unwrap());
        assert_eq!(cache.probe_count(), 2);
    }

    #[test]
    fn recording_installer_writes_marker() {
        let dir = tempfile::tempdir().unwrap();
        let installer = RecordingInstaller::new();
        let installed = installer.install("acme/tool", None, dir.path()).unwrap();
        assert_eq!(installed.version, "latest");
        assert!(installed.path.exists());
        assert_eq!(installer.installed(), vec!["acme/tool"]);

        let failing = RecordingInstaller::new().failing_on("acme/tool");
        assert!(failing.install("acme/tool", None, dir.path()).is_err());
    }
}
