//! Diffing the desired package set against the host profile.
//!
//! Profile items are matched by resolved identity: the normalized locator an
//! item was installed from, or any store path it shares with the desired
//! package. The raw spelling a user typed never takes part in the match.

use berth_runtime::ProfileItem;
use berth_schema::{Locator, StorePath};
use std::collections::HashSet;

const ATTR_PREFIXES: &[&str] = &["legacyPackages.", "packages."];

/// Canonical spelling of a locator for identity comparison.
///
/// Drops `?query` parameters of the flake reference, the per-system output
/// prefix of the attribute path, and case differences in `github:` owners
/// and repositories.
pub fn normalize_locator(locator: &str) -> String {
    let (flake, attr) = match locator.split_once('#') {
        Some((flake, attr)) => (flake, Some(attr)),
        None => (locator, None),
    };
    let flake = flake.split_once('?').map_or(flake, |(f, _)| f);
    let flake = if flake.starts_with("github:") {
        flake.to_ascii_lowercase()
    } else {
        flake.to_owned()
    };
    let Some(attr) = attr else {
        return flake;
    };
    let attr = ATTR_PREFIXES
        .iter()
        .find_map(|prefix| {
            attr.strip_prefix(prefix)
                .and_then(|rest| rest.split_once('.'))
                .map(|(_system, name)| name)
        })
        .unwrap_or(attr);
    format!("{flake}#{attr}")
}

/// A package the engine wants present in the profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredPackage {
    pub raw: String,
    /// Normalized once, at construction.
    pub locator: String,
    /// What to hand the package manager to install or build it.
    pub installable: String,
    pub store_paths: Vec<StorePath>,
}

impl DesiredPackage {
    pub fn new(raw: impl Into<String>, locator: &Locator, store_paths: Vec<StorePath>) -> Self {
        Self {
            raw: raw.into(),
            locator: normalize_locator(locator),
            installable: locator.to_string(),
            store_paths,
        }
    }
}

/// The desired packages no profile item satisfies, in input order.
///
/// Item identities are indexed once, so the cost is linear in
/// `desired.len() + items.len()`.
pub fn packages_to_install<'a>(
    desired: &'a [DesiredPackage],
    items: &[ProfileItem],
) -> Vec<&'a DesiredPackage> {
    let installed_locators: HashSet<String> = items
        .iter()
        .filter_map(|item| item.locator.as_deref().map(normalize_locator))
        .collect();
    let installed_paths: HashSet<&StorePath> =
        items.iter().flat_map(|item| item.store_paths.iter()).collect();

    desired
        .iter()
        .filter(|pkg| {
            !installed_locators.contains(&pkg.locator)
                && !pkg.store_paths.iter().any(|p| installed_paths.contains(p))
        })
        .collect()
}

/// Profile mutations that make the profile hold exactly a set of store paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub install: Vec<StorePath>,
    pub remove: Vec<ProfileItem>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.install.is_empty() && self.remove.is_empty()
    }
}

pub fn plan_sync(wanted: &[StorePath], items: &[ProfileItem]) -> SyncPlan {
    let wanted_set: HashSet<&StorePath> = wanted.iter().collect();
    let present: HashSet<&StorePath> = items.iter().flat_map(|i| i.store_paths.iter()).collect();

    let remove = items
        .iter()
        .filter(|item| !item.store_paths.iter().any(|p| wanted_set.contains(p)))
        .cloned()
        .collect();

    let mut seen = HashSet::new();
    let install = wanted
        .iter()
        .filter(|p| !present.contains(p) && seen.insert(*p))
        .cloned()
        .collect();

    SyncPlan { install, remove }
}
