//! Package references, platforms, and the declared project config for berth.
//!
//! This crate defines the schema layer: parsing raw package references
//! (`PackageRef`) into canonical and versioned identities, the set of
//! supported platforms, and the TOML project config (`ProjectConfig`) with the
//! mutators the reconciliation engine uses to edit the declared package list.

pub mod config;
pub mod fsutil;
pub mod package;
pub mod platform;
pub mod types;

pub use config::{
    parse_config_file, parse_config_str, NixpkgsSection, PackageEntry, ProjectConfig,
    CONFIG_FILE_NAME, DEFAULT_NIXPKGS_COMMIT,
};
pub use fsutil::{fsync_dir, write_atomic};
pub use package::{PackageKind, PackageRef, LATEST};
pub use platform::{current_system, ensure_valid_platforms, SUPPORTED_PLATFORMS};
pub use types::{ContentHash, Locator, StorePath};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeToml(#[from] toml::ser::Error),
    #[error("package reference must not be empty")]
    EmptyReference,
    #[error("invalid package reference '{0}'")]
    InvalidReference(String),
    #[error("unsupported platform '{platform}', expected one of: {supported}")]
    UnsupportedPlatform { platform: String, supported: String },
    #[error("package {0} not found in config")]
    PackageNotDeclared(String),
    #[error("package name '{name}' is ambiguous, matches: {matches}")]
    AmbiguousPackage { name: String, matches: String },
}
