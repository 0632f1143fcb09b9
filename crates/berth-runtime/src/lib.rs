//! Host-side collaborators of berth.
//!
//! This crate implements the execution layer: the pluggable `PackageManager`
//! trait over the host profile and the package store, with a `nix` backend
//! driving the CLI and a deterministic `mock` backend; the plugin manager that
//! lays out per-package plugin directories; the environment generator that
//! writes the evaluated environment definition; and prerequisite checks.

pub mod backend;
pub mod mock;
pub mod nix;
pub mod plugin;
pub mod prereq;
pub mod shellgen;

pub use backend::{select_backend, PackageManager, ProfileItem};
pub use mock::{mock_store_path, MockBackend, MockCalls};
pub use nix::NixBackend;
pub use plugin::{BuiltinPlugins, Plugin, PluginManager, BUILTIN_PLUGINS};
pub use prereq::{check_nix_prereqs, format_missing, MissingPrereq};
pub use shellgen::{EnvGenerator, EnvPackage, EnvSpec, FlakeGenerator, BUILD_INPUTS_VAR};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("package manager command failed: {0}")]
    ExecFailed(String),
    #[error("unexpected package manager output: {0}")]
    InvalidOutput(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("environment not generated: {0}")]
    EnvNotGenerated(String),
    #[error("plugin error: {0}")]
    Plugin(String),
}
