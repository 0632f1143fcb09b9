use crate::CoreError;
use berth_remote::{PackageIndex, PackageInfo, ResolvedVersion};
use berth_runtime::PackageManager;
use berth_schema::{Locator, PackageKind, PackageRef};
use berth_store::{LockedPackage, Lockfile, ResolutionSource, SystemInfo};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of checking a reference against its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    Exists,
    /// Known, but not built for the host platform. Not an error: the user
    /// may exclude the platform later.
    UnsupportedOnSystem,
    Missing,
}

/// A locked version that moved during `update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionChange {
    pub name: String,
    pub from: String,
    pub to: String,
}

/// Turns raw references into lockfile entries.
///
/// Catalog references go to the remote index first and fall back to a static
/// attribute path in the pinned nixpkgs revision. Index answers are memoized
/// per versioned name for the lifetime of the resolver, so validation and the
/// later resolution of the same reference cost one query.
pub struct Resolver {
    index: Arc<dyn PackageIndex>,
    package_manager: Arc<dyn PackageManager>,
    system: String,
    nixpkgs_commit: String,
    lookups: HashMap<String, Option<ResolvedVersion>>,
    legacy: HashMap<String, bool>,
}

impl Resolver {
    pub fn new(
        index: Arc<dyn PackageIndex>,
        package_manager: Arc<dyn PackageManager>,
        system: impl Into<String>,
        nixpkgs_commit: impl Into<String>,
    ) -> Self {
        Self {
            index,
            package_manager,
            system: system.into(),
            nixpkgs_commit: nixpkgs_commit.into(),
            lookups: HashMap::new(),
            legacy: HashMap::new(),
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    fn lookup(&mut self, pkg: &PackageRef) -> Result<Option<ResolvedVersion>, CoreError> {
        let key = pkg.versioned();
        if let Some(hit) = self.lookups.get(&key) {
            return Ok(hit.clone());
        }
        debug!("querying index for {key}");
        let answer = self
            .index
            .resolve(pkg.canonical_name(), pkg.version_or_latest())?;
        self.lookups.insert(key, answer.clone());
        Ok(answer)
    }

    pub fn validate_exists(&mut self, pkg: &PackageRef) -> Result<Existence, CoreError> {
        match pkg.kind() {
            PackageKind::Catalog => Ok(match self.lookup(pkg)? {
                Some(v) if v.systems.is_empty() || v.supports(&self.system) => Existence::Exists,
                Some(_) => Existence::UnsupportedOnSystem,
                None => Existence::Missing,
            }),
            PackageKind::Flake => {
                if self.package_manager.exists(pkg.raw())? {
                    Ok(Existence::Exists)
                } else {
                    Ok(Existence::Missing)
                }
            }
            PackageKind::Release => Ok(Existence::Exists),
        }
    }

    /// Installable of `name` in the pinned nixpkgs revision.
    pub fn legacy_locator(&self, name: &str) -> Locator {
        Locator::new(format!(
            "github:NixOS/nixpkgs/{}#{name}",
            self.nixpkgs_commit
        ))
    }

    pub fn legacy_exists(&mut self, name: &str) -> Result<bool, CoreError> {
        if let Some(&known) = self.legacy.get(name) {
            return Ok(known);
        }
        let exists = self
            .package_manager
            .exists(&self.legacy_locator(name))?;
        self.legacy.insert(name.to_owned(), exists);
        Ok(exists)
    }

    /// Resolve `pkg` from scratch, ignoring any lockfile entry.
    pub fn resolve(&mut self, pkg: &PackageRef) -> Result<LockedPackage, CoreError> {
        match pkg.kind() {
            PackageKind::Flake => Ok(LockedPackage::new(pkg.raw(), ResolutionSource::Flake)),
            PackageKind::Release => {
                let mut entry =
                    LockedPackage::new(pkg.canonical_name(), ResolutionSource::Release);
                entry.version = pkg.version().unwrap_or_default().to_owned();
                Ok(entry)
            }
            PackageKind::Catalog => {
                if let Some(found) = self.lookup(pkg)? {
                    if let Some(entry) = self.search_entry(&found) {
                        return Ok(entry);
                    }
                }
                // A static attribute path cannot honor a pinned version.
                if pkg.version().is_none() && self.legacy_exists(pkg.canonical_name())? {
                    info!("{} resolved through legacy nixpkgs lookup", pkg.raw());
                    return Ok(LockedPackage::new(
                        self.legacy_locator(pkg.canonical_name()),
                        ResolutionSource::Legacy,
                    ));
                }
                Err(CoreError::NotFound(pkg.raw().to_owned()))
            }
        }
    }

    fn search_entry(&self, found: &ResolvedVersion) -> Option<LockedPackage> {
        let build = found.build_for(&self.system)?;
        let mut entry = LockedPackage::new(build.locator(), ResolutionSource::Search);
        entry.version.clone_from(&found.version);
        if !build.last_updated.is_empty() {
            entry.last_modified.clone_from(&build.last_updated);
        }
        for (system, b) in &found.systems {
            entry.systems.insert(
                system.clone(),
                SystemInfo {
                    store_paths: b.store_paths.clone(),
                },
            );
        }
        Some(entry)
    }

    /// The lockfile entry for `raw`, resolving and inserting it when absent.
    pub fn locked_or_resolve(
        &mut self,
        lockfile: &mut Lockfile,
        raw: &str,
    ) -> Result<LockedPackage, CoreError> {
        if let Some(entry) = lockfile.get(raw) {
            return Ok(entry.clone());
        }
        let pkg = PackageRef::parse(raw)?;
        let entry = self.resolve(&pkg)?;
        debug!("locked {raw} -> {}", entry.resolved);
        lockfile.insert(raw, entry.clone());
        Ok(entry)
    }

    /// Re-resolve `pkg` against the index, keeping the flags of its current
    /// entry. Returns the version change, if any.
    pub fn update(
        &mut self,
        lockfile: &mut Lockfile,
        pkg: &PackageRef,
    ) -> Result<Option<VersionChange>, CoreError> {
        self.forget(pkg);
        let mut fresh = self.resolve(pkg)?;
        let previous = lockfile.get(pkg.raw()).cloned();
        let Some(old) = previous else {
            lockfile.insert(pkg.raw(), fresh);
            return Ok(None);
        };
        fresh.allow_insecure = old.allow_insecure;
        fresh.uninstallable = old.uninstallable;
        if old.resolved == fresh.resolved
            && old.version == fresh.version
            && old.systems == fresh.systems
        {
            return Ok(None);
        }
        // An unpinned release has no version until it is installed again.
        let change = (!fresh.version.is_empty() && old.version != fresh.version).then(|| {
            VersionChange {
                name: pkg.raw().to_owned(),
                from: old.version.clone(),
                to: fresh.version.clone(),
            }
        });
        lockfile.insert(pkg.raw(), fresh);
        Ok(change)
    }

    pub fn forget(&mut self, pkg: &PackageRef) {
        self.lookups.remove(&pkg.versioned());
        self.legacy.remove(pkg.canonical_name());
    }

    pub fn clear_cache(&mut self) {
        self.lookups.clear();
        self.legacy.clear();
    }

    /// Version history of `name`; not memoized.
    pub fn search(&self, name: &str) -> Result<Option<PackageInfo>, CoreError> {
        Ok(self.index.search(name)?)
    }
}
