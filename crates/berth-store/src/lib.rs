//! Project state storage for berth.
//!
//! This crate provides the on-disk state of a project: `ProjectLayout` for the
//! `.berth/` directory structure, the durable `Lockfile` (`berth.lock`) mapping
//! declared references to resolved records, and the ephemeral `LocalState`
//! (`.berth/local.lock`) that records the up-to-date signature. `StateStore`
//! combines the two and exposes the single commit point (`save`).

pub mod layout;
pub mod local;
pub mod lockfile;
pub mod state;

pub use layout::ProjectLayout;
pub use local::LocalState;
pub use lockfile::{Lockfile, LockedPackage, ResolutionSource, SystemInfo, LOCKFILE_VERSION};
pub use state::{LocalStateCleanup, StateStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lockfile parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("lockfile serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("local state error: {0}")]
    LocalState(#[from] serde_json::Error),
    #[error("unsupported lockfile_version {found}, expected {expected}")]
    VersionMismatch { expected: u32, found: u32 },
}
