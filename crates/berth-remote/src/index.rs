use crate::RemoteError;
use berth_schema::{Locator, StorePath};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One build of a resolved package version for a single platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemBuild {
    /// Flake reference of the package set, e.g. `github:NixOS/nixpkgs/<rev>`.
    pub flake_ref: String,
    pub attr_path: String,
    #[serde(default)]
    pub store_paths: Vec<StorePath>,
    #[serde(default)]
    pub last_updated: String,
}

impl SystemBuild {
    pub fn locator(&self) -> Locator {
        Locator::new(format!("{}#{}", self.flake_ref, self.attr_path))
    }
}

/// Answer of the index for a `name` + `version` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedVersion {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub systems: BTreeMap<String, SystemBuild>,
}

impl ResolvedVersion {
    pub fn supports(&self, system: &str) -> bool {
        self.systems.contains_key(system)
    }

    /// The build for `system`, or any build when this platform has none.
    ///
    /// A version that only builds elsewhere still resolves, so that the
    /// platform can be excluded later without losing the lock entry.
    pub fn build_for(&self, system: &str) -> Option<&SystemBuild> {
        self.systems
            .get(system)
            .or_else(|| self.systems.values().next())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub version: String,
    #[serde(default)]
    pub last_updated: String,
}

/// Version history of a package name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    #[serde(default)]
    pub versions: Vec<VersionSummary>,
}

/// Remote search service.
///
/// `Ok(None)` means the name or version is unknown, which callers must keep
/// apart from transport errors.
pub trait PackageIndex: Send + Sync {
    fn resolve(&self, name: &str, version: &str) -> Result<Option<ResolvedVersion>, RemoteError>;

    fn search(&self, name: &str) -> Result<Option<PackageInfo>, RemoteError>;
}

/// Substituter holding prebuilt store paths.
pub trait BinaryCache: Send + Sync {
    fn has_store_path(&self, path: &StorePath) -> Result<bool, RemoteError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledRelease {
    pub version: String,
    pub path: PathBuf,
}

/// Side channel for binaries published as release assets (`bin:owner/repo`).
pub trait ReleaseInstaller: Send + Sync {
    /// Install `repo` (`owner/name`) at `version` (or the latest release)
    /// under `dest`.
    fn install(
        &self,
        repo: &str,
        version: Option<&str>,
        dest: &Path,
    ) -> Result<InstalledRelease, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(attr: &str) -> SystemBuild {
        SystemBuild {
            flake_ref: "github:NixOS/nixpkgs/abc".to_owned(),
            attr_path: attr.to_owned(),
            store_paths: Vec::new(),
            last_updated: String::new(),
        }
    }

    #[test]
    fn locator_joins_flake_and_attr() {
        assert_eq!(
            build("go_1_21").locator(),
            "github:NixOS/nixpkgs/abc#go_1_21"
        );
    }

    #[test]
    fn build_for_falls_back_to_other_platform() {
        let mut systems = BTreeMap::new();
        systems.insert("aarch64-darwin".to_owned(), build("go_1_21"));
        let v = ResolvedVersion {
            name: "go".to_owned(),
            version: "1.21.5".to_owned(),
            summary: String::new(),
            systems,
        };
        assert!(!v.supports("x86_64-linux"));
        assert_eq!(v.build_for("x86_64-linux").unwrap().attr_path, "go_1_21");
    }

    #[test]
    fn resolved_version_parses_minimal_json() {
        let v: ResolvedVersion =
            serde_json::from_str(r#"{"name":"jq","version":"1.7"}"#).unwrap();
        assert!(v.systems.is_empty());
        assert!(v.build_for("x86_64-linux").is_none());
    }
}
