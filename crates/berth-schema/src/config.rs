use crate::package::PackageRef;
use crate::platform::ensure_valid_platforms;
use crate::types::ContentHash;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "berth.toml";

/// nixpkgs revision used for legacy attribute lookups when the config does not pin one.
pub const DEFAULT_NIXPKGS_COMMIT: &str = "f80ac848e3d6f0c12c52758c0f25c10c97ca3b62";

/// The declared package list of a project (`berth.toml`).
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default)]
    pub packages: Vec<PackageEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nixpkgs: Option<NixpkgsSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NixpkgsSection {
    pub commit: String,
}

/// One declared package and its per-package attributes.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackageEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_platforms: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_plugin: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub patch_glibc: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

impl PackageEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platforms: Vec::new(),
            excluded_platforms: Vec::new(),
            disable_plugin: false,
            patch_glibc: false,
        }
    }

    pub fn package_ref(&self) -> Result<PackageRef, SchemaError> {
        PackageRef::parse(&self.name)
    }

    /// Whether the package should be installed on `system`.
    pub fn is_enabled_on(&self, system: &str) -> bool {
        if !self.platforms.is_empty() && !self.platforms.iter().any(|p| p == system) {
            return false;
        }
        !self.excluded_platforms.iter().any(|p| p == system)
    }
}

impl ProjectConfig {
    pub fn package_names(&self) -> Vec<&str> {
        self.packages.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn contains(&self, raw: &str) -> bool {
        self.packages.iter().any(|p| p.name == raw)
    }

    pub fn get(&self, raw: &str) -> Option<&PackageEntry> {
        self.packages.iter().find(|p| p.name == raw)
    }

    pub fn nixpkgs_commit(&self) -> &str {
        self.nixpkgs
            .as_ref()
            .map_or(DEFAULT_NIXPKGS_COMMIT, |n| n.commit.as_str())
    }

    /// Find the entry whose raw spelling or canonical name equals `name`.
    ///
    /// More than one match is an error; the caller must be explicit.
    pub fn find_by_name(&self, name: &str) -> Result<Option<&PackageEntry>, SchemaError> {
        let matches: Vec<&PackageEntry> = self
            .packages
            .iter()
            .filter(|entry| {
                entry.name == name
                    || PackageRef::parse(&entry.name).is_ok_and(|p| p.canonical_name() == name)
            })
            .collect();
        match matches.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some(one)),
            many => Err(SchemaError::AmbiguousPackage {
                name: name.to_owned(),
                matches: many
                    .iter()
                    .map(|e| e.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    pub fn add(&mut self, raw: &str) {
        if !self.contains(raw) {
            self.packages.push(PackageEntry::new(raw));
        }
    }

    pub fn remove(&mut self, raw: &str) -> bool {
        let before = self.packages.len();
        self.packages.retain(|p| p.name != raw);
        self.packages.len() != before
    }

    fn entry_mut(&mut self, raw: &str) -> Result<&mut PackageEntry, SchemaError> {
        self.packages
            .iter_mut()
            .find(|p| p.name == raw)
            .ok_or_else(|| SchemaError::PackageNotDeclared(raw.to_owned()))
    }

    /// Restrict `raw` to `platforms`. Any excluded platforms are dropped, since
    /// an allow-list supersedes them; the dropped list is returned.
    pub fn add_platforms(
        &mut self,
        raw: &str,
        platforms: &[String],
    ) -> Result<Vec<String>, SchemaError> {
        if platforms.is_empty() {
            return Ok(Vec::new());
        }
        ensure_valid_platforms(platforms)?;
        let entry = self.entry_mut(raw)?;
        for platform in platforms {
            if !entry.platforms.contains(platform) {
                entry.platforms.push(platform.clone());
            }
        }
        Ok(std::mem::take(&mut entry.excluded_platforms))
    }

    /// Exclude `platforms` for `raw`. Any allow-list is dropped and returned.
    pub fn exclude_platforms(
        &mut self,
        raw: &str,
        platforms: &[String],
    ) -> Result<Vec<String>, SchemaError> {
        if platforms.is_empty() {
            return Ok(Vec::new());
        }
        ensure_valid_platforms(platforms)?;
        let entry = self.entry_mut(raw)?;
        for platform in platforms {
            if !entry.excluded_platforms.contains(platform) {
                entry.excluded_platforms.push(platform.clone());
            }
        }
        Ok(std::mem::take(&mut entry.platforms))
    }

    pub fn set_disable_plugin(&mut self, raw: &str, disable: bool) -> Result<(), SchemaError> {
        self.entry_mut(raw)?.disable_plugin = disable;
        Ok(())
    }

    pub fn set_patch_glibc(&mut self, raw: &str, patch: bool) -> Result<(), SchemaError> {
        self.entry_mut(raw)?.patch_glibc = patch;
        Ok(())
    }

    /// Signature of the declared content; any edit to the package list or
    /// its attributes changes it.
    pub fn content_hash(&self) -> ContentHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(format!("nixpkgs:{}", self.nixpkgs_commit()).as_bytes());
        for entry in &self.packages {
            hasher.update(format!("pkg:{}", entry.name).as_bytes());
            for p in &entry.platforms {
                hasher.update(format!("platform:{p}").as_bytes());
            }
            for p in &entry.excluded_platforms {
                hasher.update(format!("exclude:{p}").as_bytes());
            }
            if entry.disable_plugin {
                hasher.update(b"disable_plugin");
            }
            if entry.patch_glibc {
                hasher.update(b"patch_glibc");
            }
        }
        ContentHash::new(hasher.finalize().to_hex().to_string())
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SchemaError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        crate::write_atomic(path, content.as_bytes())?;
        Ok(())
    }

    /// Read the config, or start from an empty one when the file does not exist yet.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        match fs::read_to_string(path.as_ref()) {
            Ok(content) => parse_config_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

pub fn parse_config_str(input: &str) -> Result<ProjectConfig, SchemaError> {
    let config: ProjectConfig = toml::from_str(input)?;
    for entry in &config.packages {
        PackageRef::parse(&entry.name)?;
        ensure_valid_platforms(&entry.platforms)?;
        ensure_valid_platforms(&entry.excluded_platforms)?;
    }
    Ok(config)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<ProjectConfig, SchemaError> {
    let content = fs::read_to_string(path)?;
    parse_config_str(&content)
}
