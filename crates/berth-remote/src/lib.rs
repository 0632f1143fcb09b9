//! Remote collaborators of berth.
//!
//! This crate provides the package index (the search service that maps a
//! name and version to a resolved locator per platform), the binary cache
//! probe, and the installer for release binaries that live outside the
//! profile. Each concern is a trait with an HTTP client built on `ureq` and an
//! in-memory implementation for offline use and tests.

pub mod config;
pub mod http;
pub mod index;
pub mod memory;

pub use config::RemoteConfig;
pub use http::{GithubReleaseInstaller, HttpBinaryCache, HttpIndex};
pub use index::{
    BinaryCache, InstalledRelease, PackageIndex, PackageInfo, ReleaseInstaller, ResolvedVersion,
    SystemBuild, VersionSummary,
};
pub use memory::{InMemoryCache, InMemoryIndex, RecordingInstaller};

/// Protocol version sent as `X-Berth-Protocol` header on search requests.
pub const PROTOCOL_VERSION: u32 = 1;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote config error: {0}")]
    Config(String),
}
