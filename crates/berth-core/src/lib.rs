//! Reconciliation core of berth.
//!
//! This crate ties the declared config, the lockfile store, the remote index
//! and the package manager together into the `Engine`, which brings the
//! declared package list, `berth.lock` and the host profile into agreement.
//! It also provides the package `Resolver` with its legacy fallback, the
//! binary cache validator, the profile differ, the project advisory lock and
//! cooperative cancellation.

pub mod concurrency;
pub mod engine;
pub mod profile;
pub mod resolver;
pub mod session;
pub mod validate;

pub use concurrency::{install_signal_handler, CancelToken, ProjectLock};
pub use engine::{
    AddOptions, AddReport, Collaborators, Engine, EngineOptions, InstallMode, ListEntry,
    ReconcileReport, RemoveReport, UpdateReport,
};
pub use profile::{normalize_locator, packages_to_install, plan_sync, DesiredPackage, SyncPlan};
pub use resolver::{Existence, Resolver, VersionChange};
pub use session::{EnvContext, ProcessState};
pub use validate::BinaryCacheValidator;

use thiserror::Error;

/// Stable prefix of wrapped downstream failures.
pub const INSTALLATION_ERROR_PREFIX: &str = "there was an error installing packages";

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("package {0} not found")]
    NotFound(String),
    #[error(
        "package {package} cannot be installed on {platform}\n\
         hint: skip it on this platform with `berth add {package} --exclude-platform {platform}`\n\
         hint: or try a different version of the package"
    )]
    PlatformIncompatible { package: String, platform: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("config error: {0}")]
    Schema(#[from] berth_schema::SchemaError),
    #[error("store error: {0}")]
    Store(#[from] berth_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] berth_runtime::RuntimeError),
    #[error("remote error: {0}")]
    Remote(#[from] berth_remote::RemoteError),
    #[error("there was an error installing packages: {0}")]
    Installation(#[source] Box<CoreError>),
    #[error("operation cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Attach the installation summary to downstream tool failures. Errors
    /// that already tell the user what to do pass through unchanged.
    pub fn into_installation(self) -> Self {
        match self {
            e @ (Self::NotFound(_)
            | Self::PlatformIncompatible { .. }
            | Self::Validation(_)
            | Self::Schema(_)
            | Self::Cancelled
            | Self::Installation(_)) => e,
            other => Self::Installation(Box::new(other)),
        }
    }
}
