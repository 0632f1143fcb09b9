use crate::CoreError;
use berth_remote::BinaryCache;
use berth_runtime::PackageManager;
use berth_schema::StorePath;
use berth_store::LockedPackage;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const NIXPKGS_GITHUB: &str = "github:nixos/nixpkgs/";

/// The flake reference of `locator` when it points into a pinned revision of
/// nixpkgs on GitHub, e.g. `github:NixOS/nixpkgs/<rev>`.
pub fn nixpkgs_flake_ref(locator: &str) -> Option<&str> {
    let flake = locator.split_once('#').map_or(locator, |(f, _)| f);
    let prefix = flake.get(..NIXPKGS_GITHUB.len())?;
    if !prefix.eq_ignore_ascii_case(NIXPKGS_GITHUB) || flake.len() == NIXPKGS_GITHUB.len() {
        return None;
    }
    Some(flake)
}

/// Checks that packages about to be installed can be installed here.
///
/// A package whose outputs are all in the binary cache is accepted as is.
/// Anything else sourced from nixpkgs is prefetched and evaluated for the
/// host platform before the engine touches the profile.
pub struct BinaryCacheValidator {
    cache: Arc<dyn BinaryCache>,
    package_manager: Arc<dyn PackageManager>,
    known: HashMap<StorePath, bool>,
}

impl BinaryCacheValidator {
    pub fn new(cache: Arc<dyn BinaryCache>, package_manager: Arc<dyn PackageManager>) -> Self {
        Self {
            cache,
            package_manager,
            known: HashMap::new(),
        }
    }

    /// Probe every path not probed before. Returns the number of probes made.
    pub fn fill_cache<'a>(
        &mut self,
        paths: impl IntoIterator<Item = &'a StorePath>,
    ) -> Result<usize, CoreError> {
        let mut probes = 0;
        for path in paths {
            if self.known.contains_key(path) {
                continue;
            }
            let cached = self
                .cache
                .has_store_path(path)
                .map_err(|e| CoreError::Validation(format!("binary cache probe for {path}: {e}")))?;
            self.known.insert(path.clone(), cached);
            probes += 1;
        }
        if probes > 0 {
            debug!("probed {probes} store paths in the binary cache");
        }
        Ok(probes)
    }

    /// True when `entry` has outputs for `system` and all of them are cached.
    pub fn is_in_binary_cache(
        &mut self,
        entry: &LockedPackage,
        system: &str,
    ) -> Result<bool, CoreError> {
        let paths = entry.store_paths(system);
        if paths.is_empty() {
            return Ok(false);
        }
        self.fill_cache(paths)?;
        Ok(paths
            .iter()
            .all(|p| self.known.get(p).copied().unwrap_or(false)))
    }

    pub fn validate(
        &mut self,
        raw: &str,
        entry: &LockedPackage,
        system: &str,
    ) -> Result<(), CoreError> {
        if self.is_in_binary_cache(entry, system)? {
            return Ok(());
        }
        let Some(flake_ref) = nixpkgs_flake_ref(&entry.resolved) else {
            return Ok(());
        };
        debug!("{raw} not cached, checking {} on {system}", entry.resolved);
        self.package_manager
            .prefetch(flake_ref)
            .map_err(|e| CoreError::Validation(format!("prefetching {flake_ref}: {e}")))?;
        let installs = self
            .package_manager
            .installs_on_system(&entry.resolved)
            .map_err(|e| CoreError::Validation(format!("evaluating {raw}: {e}")))?;
        if !installs {
            return Err(CoreError::PlatformIncompatible {
                package: raw.to_owned(),
                platform: system.to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_remote::InMemoryCache;
    use berth_runtime::MockBackend;
    use berth_store::{ResolutionSource, SystemInfo};

    const SYSTEM: &str = "x86_64-linux";

    fn entry(locator: &str, paths: &[&str]) -> LockedPackage {
        let mut e = LockedPackage::new(locator, ResolutionSource::Search);
        e.systems.insert(
            SYSTEM.to_owned(),
            SystemInfo {
                store_paths: paths.iter().map(|p| StorePath::new(*p)).collect(),
            },
        );
        e
    }

    #[test]
    fn recognizes_nixpkgs_flake_refs() {
        assert_eq!(
            nixpkgs_flake_ref("github:NixOS/nixpkgs/abc#hello"),
            Some("github:NixOS/nixpkgs/abc")
        );
        assert_eq!(
            nixpkgs_flake_ref("github:nixos/nixpkgs/abc"),
            Some("github:nixos/nixpkgs/abc")
        );
        assert_eq!(nixpkgs_flake_ref("github:NixOS/nixpkgs/"), None);
        assert_eq!(nixpkgs_flake_ref("github:acme/tool#cli"), None);
        assert_eq!(nixpkgs_flake_ref("./local#x"), None);
    }

    #[test]
    fn cached_package_skips_evaluation() {
        let cache = Arc::new(InMemoryCache::new());
        cache.add(StorePath::new("/nix/store/aaa-hello"));
        let backend = Arc::new(MockBackend::new().with_unsupported("hello"));
        let mut v = BinaryCacheValidator::new(cache, Arc::clone(&backend) as Arc<dyn PackageManager>);
        v.validate(
            "hello",
            &entry("github:NixOS/nixpkgs/abc#hello", &["/nix/store/aaa-hello"]),
            SYSTEM,
        )
        .unwrap();
        assert!(backend.calls().platform_checks.is_empty());
        assert!(backend.calls().prefetched.is_empty());
    }

    #[test]
    fn uncached_unsupported_package_is_platform_incompatible() {
        let backend = Arc::new(MockBackend::new().with_unsupported("hello"));
        let mut v = BinaryCacheValidator::new(
            Arc::new(InMemoryCache::new()),
            Arc::clone(&backend) as Arc<dyn PackageManager>,
        );
        let err = v
            .validate(
                "hello@2.0",
                &entry("github:NixOS/nixpkgs/abc#hello", &["/nix/store/aaa-hello"]),
                SYSTEM,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::PlatformIncompatible { ref package, ref platform }
                if package == "hello@2.0" && platform == SYSTEM
        ));
        assert_eq!(backend.calls().prefetched, vec!["github:NixOS/nixpkgs/abc"]);
    }

    #[test]
    fn non_nixpkgs_sources_are_not_evaluated() {
        let backend = Arc::new(MockBackend::new().with_unsupported("cli"));
        let mut v = BinaryCacheValidator::new(
            Arc::new(InMemoryCache::new()),
            Arc::clone(&backend) as Arc<dyn PackageManager>,
        );
        v.validate("github:acme/tool#cli", &entry("github:acme/tool#cli", &[]), SYSTEM)
            .unwrap();
        assert!(backend.calls().platform_checks.is_empty());
    }

    #[test]
    fn fill_cache_probes_each_path_once() {
        let cache = Arc::new(InMemoryCache::new());
        let mut v = BinaryCacheValidator::new(
            Arc::clone(&cache) as Arc<dyn BinaryCache>,
            Arc::new(MockBackend::new()),
        );
        let paths = [StorePath::new("/nix/store/aaa-a"), StorePath::new("/nix/store/bbb-b")];
        assert_eq!(v.fill_cache(&paths).unwrap(), 2);
        assert_eq!(v.fill_cache(&paths).unwrap(), 0);
        assert_eq!(cache.probe_count(), 2);
    }
}
