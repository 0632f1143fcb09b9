use crate::StoreError;
use berth_schema::{ContentHash, Locator, StorePath};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

pub const LOCKFILE_VERSION: u32 = 1;

/// Where a locked package's locator came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    /// Remote package index.
    Search,
    /// Static attribute path in the pinned nixpkgs revision.
    Legacy,
    /// Direct installable written by the user.
    Flake,
    /// Release binary installed outside the profile.
    Release,
}

/// Build outputs of a package for one platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemInfo {
    #[serde(default)]
    pub store_paths: Vec<StorePath>,
}

/// A lockfile entry: the resolved identity of one declared reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockedPackage {
    pub resolved: Locator,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    pub source: ResolutionSource,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_modified: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub allow_insecure: bool,
    /// Declared but excluded on some platform; tracked so later runs need not
    /// resolve it again.
    #[serde(default, skip_serializing_if = "is_false")]
    pub uninstallable: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub systems: BTreeMap<String, SystemInfo>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

impl LockedPackage {
    pub fn new(resolved: impl Into<Locator>, source: ResolutionSource) -> Self {
        Self {
            resolved: resolved.into(),
            version: String::new(),
            source,
            last_modified: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            allow_insecure: false,
            uninstallable: false,
            systems: BTreeMap::new(),
        }
    }

    pub fn store_paths(&self, system: &str) -> &[StorePath] {
        self.systems
            .get(system)
            .map(|s| s.store_paths.as_slice())
            .unwrap_or_default()
    }
}

/// Durable mapping from declared references to resolved records (`berth.lock`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lockfile {
    pub lockfile_version: u32,
    #[serde(default)]
    pub packages: BTreeMap<String, LockedPackage>,
}

impl Default for Lockfile {
    fn default() -> Self {
        Self {
            lockfile_version: LOCKFILE_VERSION,
            packages: BTreeMap::new(),
        }
    }
}

impl Lockfile {
    pub fn get(&self, raw: &str) -> Option<&LockedPackage> {
        self.packages.get(raw)
    }

    pub fn get_mut(&mut self, raw: &str) -> Option<&mut LockedPackage> {
        self.packages.get_mut(raw)
    }

    pub fn contains(&self, raw: &str) -> bool {
        self.packages.contains_key(raw)
    }

    pub fn insert(&mut self, raw: impl Into<String>, pkg: LockedPackage) {
        self.packages.insert(raw.into(), pkg);
    }

    pub fn remove(&mut self, raw: &str) -> Option<LockedPackage> {
        self.packages.remove(raw)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Drop entries for references that are no longer declared. Returns the
    /// pruned references.
    pub fn tidy(&mut self, declared: &[&str]) -> Vec<String> {
        let stale: Vec<String> = self
            .packages
            .keys()
            .filter(|raw| !declared.contains(&raw.as_str()))
            .cloned()
            .collect();
        for raw in &stale {
            debug!("pruning lockfile entry {raw}");
            self.packages.remove(raw);
        }
        stale
    }

    /// Record `raw` as uninstallable. An existing entry keeps its resolution
    /// and only gains the marker; `resolve` is called only when there is no
    /// entry yet. Returns whether the lockfile changed.
    pub fn ensure_uninstallable<E>(
        &mut self,
        raw: &str,
        resolve: impl FnOnce() -> Result<LockedPackage, E>,
    ) -> Result<bool, E> {
        if let Some(existing) = self.packages.get_mut(raw) {
            if existing.uninstallable {
                return Ok(false);
            }
            existing.uninstallable = true;
            return Ok(true);
        }
        let mut entry = resolve()?;
        entry.uninstallable = true;
        self.packages.insert(raw.to_owned(), entry);
        Ok(true)
    }

    pub fn to_toml(&self) -> Result<String, StoreError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Hash of the serialized durable content.
    pub fn content_hash(&self) -> Result<ContentHash, StoreError> {
        Ok(ContentHash::of(self.to_toml()?.as_bytes()))
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        berth_schema::write_atomic(path.as_ref(), self.to_toml()?.as_bytes())?;
        Ok(())
    }

    /// Read `berth.lock`; a missing file is an empty lockfile.
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let content = match fs::read_to_string(path.as_ref()) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let lock: Self = toml::from_str(&content)?;
        if lock.lockfile_version != LOCKFILE_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: LOCKFILE_VERSION,
                found: lock.lockfile_version,
            });
        }
        Ok(lock)
    }
}
