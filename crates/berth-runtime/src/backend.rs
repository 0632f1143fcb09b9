use crate::RuntimeError;
use berth_schema::{Locator, StorePath};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One element of the host profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileItem {
    pub index: usize,
    pub name: String,
    /// Installable the element came from; `None` for elements installed by
    /// store path.
    pub locator: Option<Locator>,
    pub store_paths: Vec<StorePath>,
}

/// The external package manager: host profile, package store and evaluator.
pub trait PackageManager: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Platform string of the host, e.g. `x86_64-linux`.
    fn system(&self) -> String;

    fn profile_list(&self, profile: &Path) -> Result<Vec<ProfileItem>, RuntimeError>;

    /// Add `installables` (locators or store paths) to the profile.
    fn profile_install(&self, profile: &Path, installables: &[String]) -> Result<(), RuntimeError>;

    fn profile_remove(&self, profile: &Path, items: &[ProfileItem]) -> Result<(), RuntimeError>;

    /// Realize `installables` in the store without touching any profile.
    fn build(&self, installables: &[String]) -> Result<(), RuntimeError>;

    /// Whether `installable` evaluates at all.
    fn exists(&self, installable: &str) -> Result<bool, RuntimeError>;

    /// Whether `installable` can be built for the host platform.
    fn installs_on_system(&self, installable: &str) -> Result<bool, RuntimeError>;

    /// Fetch the source of `flake_ref` into the store ahead of evaluation.
    fn prefetch(&self, flake_ref: &str) -> Result<(), RuntimeError>;

    /// Evaluate the environment generated under `gen_dir` and return its
    /// string variables.
    fn print_dev_env(&self, gen_dir: &Path) -> Result<BTreeMap<String, String>, RuntimeError>;

    /// Permit evaluation of `installables` even when marked insecure.
    fn allow_insecure(&self, installables: &[String]) -> Result<(), RuntimeError>;
}

pub fn select_backend(name: &str) -> Result<Box<dyn PackageManager>, RuntimeError> {
    match name {
        "nix" => Ok(Box::new(crate::nix::NixBackend::new())),
        "mock" => Ok(Box::new(crate::mock::MockBackend::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_valid_backends() {
        assert_eq!(select_backend("nix").unwrap().name(), "nix");
        assert_eq!(select_backend("mock").unwrap().name(), "mock");
    }

    #[test]
    fn select_invalid_backend_fails() {
        assert!(matches!(
            select_backend("nonexistent"),
            Err(RuntimeError::BackendUnavailable(_))
        ));
    }
}
