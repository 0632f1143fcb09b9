use crate::backend::{PackageManager, ProfileItem};
use crate::shellgen::{read_spec, BUILD_INPUTS_VAR};
use crate::RuntimeError;
use berth_schema::{current_system, Locator, StorePath};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

const PROFILE_STATE: &str = "berth-mock-profile.json";

/// Attribute name of an installable: `github:x/y#legacyPackages.s.go` → `go`,
/// `/nix/store/<hash>-go-1.21` → `go-1.21`.
fn attr_name(installable: &str) -> &str {
    if let Some(base) = installable.strip_prefix("/nix/store/") {
        return base.split_once('-').map_or(base, |(_, name)| name);
    }
    let attr = installable
        .rsplit_once('#')
        .map_or(installable, |(_, attr)| attr);
    attr.rsplit(['.', '/', ':']).next().unwrap_or(attr)
}

/// Deterministic store path the mock backend assigns to `installable`.
pub fn mock_store_path(installable: &str) -> StorePath {
    if installable.starts_with("/nix/store/") {
        return StorePath::new(installable);
    }
    let hash = blake3::hash(installable.as_bytes()).to_hex();
    StorePath::new(format!(
        "/nix/store/{}-{}",
        &hash.as_str()[..32],
        attr_name(installable)
    ))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MockProfile {
    generation: u64,
    elements: Vec<MockElement>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MockElement {
    name: String,
    locator: Option<Locator>,
    store_paths: Vec<StorePath>,
}

impl MockProfile {
    fn load(profile: &Path) -> Result<Self, RuntimeError> {
        match std::fs::read_to_string(profile.join(PROFILE_STATE)) {
            Ok(c) => Ok(serde_json::from_str(&c)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, profile: &Path) -> Result<(), RuntimeError> {
        std::fs::create_dir_all(profile)?;
        std::fs::write(
            profile.join(PROFILE_STATE),
            serde_json::to_string_pretty(self)?,
        )?;
        Ok(())
    }
}

/// Calls observed by a [`MockBackend`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub built: Vec<String>,
    pub prefetched: Vec<String>,
    pub platform_checks: Vec<String>,
    pub existence_checks: Vec<String>,
    pub insecure: Vec<String>,
    pub dev_env_evaluations: usize,
}

/// Package manager that keeps its profile as JSON inside the profile
/// directory and never runs anything.
///
/// Every installable exists and installs unless configured otherwise with
/// [`with_missing`](Self::with_missing) or
/// [`with_unsupported`](Self::with_unsupported), keyed by attribute name.
pub struct MockBackend {
    system: String,
    missing: HashSet<String>,
    unsupported: HashSet<String>,
    calls: Mutex<MockCalls>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            system: current_system(),
            missing: HashSet::new(),
            unsupported: HashSet::new(),
            calls: Mutex::new(MockCalls::default()),
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_system(mut self, system: &str) -> Self {
        system.clone_into(&mut self.system);
        self
    }

    #[must_use]
    pub fn with_missing(mut self, attr: &str) -> Self {
        self.missing.insert(attr.to_owned());
        self
    }

    #[must_use]
    pub fn with_unsupported(mut self, attr: &str) -> Self {
        self.unsupported.insert(attr.to_owned());
        self
    }

    pub fn calls(&self) -> MockCalls {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of mutations applied to the profile at `profile`.
    pub fn generation(profile: &Path) -> Result<u64, RuntimeError> {
        Ok(MockProfile::load(profile)?.generation)
    }

    fn record(&self, f: impl FnOnce(&mut MockCalls)) -> Result<(), RuntimeError> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
        f(&mut calls);
        Ok(())
    }
}

impl PackageManager for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn system(&self) -> String {
        self.system.clone()
    }

    fn profile_list(&self, profile: &Path) -> Result<Vec<ProfileItem>, RuntimeError> {
        Ok(MockProfile::load(profile)?
            .elements
            .into_iter()
            .enumerate()
            .map(|(index, e)| ProfileItem {
                index,
                name: e.name,
                locator: e.locator,
                store_paths: e.store_paths,
            })
            .collect())
    }

    fn profile_install(&self, profile: &Path, installables: &[String]) -> Result<(), RuntimeError> {
        if installables.is_empty() {
            return Ok(());
        }
        let mut state = MockProfile::load(profile)?;
        for installable in installables {
            if self.missing.contains(attr_name(installable)) {
                return Err(RuntimeError::ExecFailed(format!(
                    "mock: cannot install {installable}"
                )));
            }
            let locator = (!installable.starts_with("/nix/store/"))
                .then(|| Locator::new(installable.as_str()));
            state.elements.push(MockElement {
                name: attr_name(installable).to_owned(),
                locator,
                store_paths: vec![mock_store_path(installable)],
            });
        }
        state.generation += 1;
        state.save(profile)
    }

    fn profile_remove(&self, profile: &Path, items: &[ProfileItem]) -> Result<(), RuntimeError> {
        if items.is_empty() {
            return Ok(());
        }
        let mut state = MockProfile::load(profile)?;
        state
            .elements
            .retain(|e| !items.iter().any(|i| i.store_paths == e.store_paths));
        state.generation += 1;
        state.save(profile)
    }

    fn build(&self, installables: &[String]) -> Result<(), RuntimeError> {
        if let Some(bad) = installables
            .iter()
            .find(|i| self.missing.contains(attr_name(i)))
        {
            return Err(RuntimeError::ExecFailed(format!("mock: cannot build {bad}")));
        }
        self.record(|c| c.built.extend(installables.iter().cloned()))
    }

    fn exists(&self, installable: &str) -> Result<bool, RuntimeError> {
        self.record(|c| c.existence_checks.push(installable.to_owned()))?;
        Ok(!self.missing.contains(attr_name(installable)))
    }

    fn installs_on_system(&self, installable: &str) -> Result<bool, RuntimeError> {
        self.record(|c| c.platform_checks.push(installable.to_owned()))?;
        Ok(!self.unsupported.contains(attr_name(installable)))
    }

    fn prefetch(&self, flake_ref: &str) -> Result<(), RuntimeError> {
        self.record(|c| c.prefetched.push(flake_ref.to_owned()))
    }

    fn print_dev_env(&self, gen_dir: &Path) -> Result<BTreeMap<String, String>, RuntimeError> {
        let spec = read_spec(gen_dir)?;
        self.record(|c| c.dev_env_evaluations += 1)?;
        let inputs: Vec<String> = spec
            .packages
            .iter()
            .flat_map(|p| {
                if p.store_paths.is_empty() {
                    vec![mock_store_path(&p.locator).into_inner()]
                } else {
                    p.store_paths.iter().map(ToString::to_string).collect()
                }
            })
            .collect();
        let path = inputs
            .iter()
            .map(|p| format!("{p}/bin"))
            .collect::<Vec<_>>()
            .join(":");
        let mut vars = BTreeMap::new();
        vars.insert(BUILD_INPUTS_VAR.to_owned(), inputs.join(" "));
        vars.insert("PATH".to_owned(), path);
        Ok(vars)
    }

    fn allow_insecure(&self, installables: &[String]) -> Result<(), RuntimeError> {
        self.record(|c| c.insecure.extend(installables.iter().cloned()))
    }
}
