//! The reconciliation engine.
//!
//! Every public operation edits the in-memory config and lockfile, then runs
//! [`Engine::reconcile`], which brings the lockfile and the host profile in
//! line with the declared package list. `berth.lock` is written exactly once,
//! as the last step of a successful reconciliation; `berth.toml` is written
//! right after it. When an operation fails, the in-memory state is rolled
//! back so the engine keeps matching what is on disk.

use crate::concurrency::CancelToken;
use crate::profile::{packages_to_install, plan_sync, DesiredPackage};
use crate::resolver::{Existence, Resolver, VersionChange};
use crate::session::{EnvContext, ProcessState};
use crate::validate::BinaryCacheValidator;
use crate::CoreError;
use berth_remote::{BinaryCache, PackageIndex, PackageInfo, ReleaseInstaller};
use berth_runtime::{EnvGenerator, EnvPackage, EnvSpec, PackageManager, PluginManager, BUILD_INPUTS_VAR};
use berth_schema::{PackageEntry, PackageRef, ProjectConfig, StorePath, CONFIG_FILE_NAME};
use berth_store::{LockedPackage, Lockfile, ProjectLayout, StateStore};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

const RELEASE_PREFIX: &str = "bin:";

/// External collaborators the engine drives.
#[derive(Clone)]
pub struct Collaborators {
    pub index: Arc<dyn PackageIndex>,
    pub cache: Arc<dyn BinaryCache>,
    pub releases: Arc<dyn ReleaseInstaller>,
    pub package_manager: Arc<dyn PackageManager>,
    pub plugins: Arc<dyn PluginManager>,
    pub env_generator: Arc<dyn EnvGenerator>,
}

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub context: EnvContext,
    pub process: Arc<ProcessState>,
    pub cancel: CancelToken,
}

/// Flow selector of [`Engine::reconcile`]. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    Install,
    Uninstall,
    Update,
    /// Make the profile match; a no-op when nothing changed since the last run.
    Ensure,
}

/// Per-package attributes applied by `add`.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    pub platforms: Vec<String>,
    pub exclude_platforms: Vec<String>,
    pub disable_plugin: bool,
    pub patch_glibc: bool,
    pub allow_insecure: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// The project was up to date before this run.
    pub up_to_date: bool,
    pub validated: Vec<String>,
    pub releases_installed: Vec<String>,
    pub profile_installed: Vec<String>,
    pub profile_removed: Vec<String>,
    pub built: Vec<String>,
    pub removed_symlinks: usize,
    pub pruned: Vec<String>,
    pub marked_uninstallable: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AddReport {
    pub added: Vec<String>,
    /// Already declared with this exact spelling.
    pub unchanged: Vec<String>,
    /// Other versions of an added package, dropped from the config.
    pub replaced: Vec<String>,
    /// `(package, plugin notes)` for added packages that come with a plugin.
    pub readmes: Vec<(String, String)>,
    pub reconcile: ReconcileReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RemoveReport {
    pub removed: Vec<String>,
    pub missing: Vec<String>,
    /// `None` when nothing matched and no reconciliation ran.
    pub reconcile: Option<ReconcileReport>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateReport {
    pub changes: Vec<VersionChange>,
    pub reconcile: ReconcileReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    pub name: String,
    pub version: Option<String>,
    pub locator: Option<String>,
    /// Installed on this platform.
    pub enabled: bool,
    pub uninstallable: bool,
}

/// A declared, enabled package with its lockfile entry.
struct Planned {
    entry: PackageEntry,
    pkg: PackageRef,
    locked: LockedPackage,
}

pub struct Engine {
    collab: Collaborators,
    options: EngineOptions,
    config: ProjectConfig,
    store: StateStore,
    resolver: Resolver,
    validator: BinaryCacheValidator,
    system: String,
}

impl Engine {
    pub fn open(
        project_dir: impl Into<PathBuf>,
        collab: Collaborators,
        options: EngineOptions,
    ) -> Result<Self, CoreError> {
        let layout = ProjectLayout::new(project_dir);
        let config = ProjectConfig::load_or_default(layout.config_path())?;
        let store = StateStore::open(layout)?;
        let system = collab.package_manager.system();
        let resolver = Resolver::new(
            Arc::clone(&collab.index),
            Arc::clone(&collab.package_manager),
            system.clone(),
            config.nixpkgs_commit(),
        );
        let validator = BinaryCacheValidator::new(
            Arc::clone(&collab.cache),
            Arc::clone(&collab.package_manager),
        );
        debug!(
            "opened project {} ({} declared packages, system {system})",
            store.layout().root().display(),
            config.packages.len()
        );
        Ok(Self {
            collab,
            options,
            config,
            store,
            resolver,
            validator,
            system,
        })
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn lockfile(&self) -> &Lockfile {
        self.store.lockfile()
    }

    pub fn layout(&self) -> &ProjectLayout {
        self.store.layout()
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    /// Run `op`, restoring config, lockfile and resolver memo if it fails.
    fn transaction<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let config = self.config.clone();
        let lockfile = self.store.lockfile().clone();
        op(self).inspect_err(|e| {
            debug!("rolling back in-memory state: {e}");
            self.config = config;
            self.store.replace_lockfile(lockfile);
            self.resolver.clear_cache();
        })
    }

    fn save_config(&self) -> Result<(), CoreError> {
        self.config.write_to_file(self.store.layout().config_path())?;
        info!("saved {CONFIG_FILE_NAME}");
        Ok(())
    }

    pub fn add(&mut self, names: &[String], options: &AddOptions) -> Result<AddReport, CoreError> {
        self.transaction(|engine| engine.add_packages(names, options))
    }

    fn add_packages(
        &mut self,
        names: &[String],
        options: &AddOptions,
    ) -> Result<AddReport, CoreError> {
        let mut report = AddReport::default();
        let mut touched: Vec<String> = Vec::new();
        let mut seen = HashSet::new();

        for name in names {
            let pkg = PackageRef::parse(name)?;
            if !seen.insert(pkg.raw().to_owned()) {
                continue;
            }
            let versioned = pkg.versioned();

            if let Some(existing) = [pkg.raw(), versioned.as_str()]
                .into_iter()
                .find(|n| self.config.contains(n))
            {
                info!("{existing} is already in {CONFIG_FILE_NAME}");
                report.unchanged.push(existing.to_owned());
                touched.push(existing.to_owned());
                continue;
            }

            let replaced: Vec<String> = self
                .config
                .packages
                .iter()
                .filter(|e| {
                    e.package_ref().is_ok_and(|p| {
                        p.kind() == pkg.kind() && p.canonical_name() == pkg.canonical_name()
                    })
                })
                .map(|e| e.name.clone())
                .collect();
            for old in replaced {
                info!("replacing {old} with {}", pkg.raw());
                self.config.remove(&old);
                self.store.lockfile_mut().remove(&old);
                touched.retain(|t| *t != old);
                report.unchanged.retain(|t| *t != old);
                // Added earlier in this call: it was never declared on disk.
                if let Some(pos) = report.added.iter().position(|a| *a == old) {
                    report.added.remove(pos);
                } else {
                    report.replaced.push(old);
                }
            }

            self.options.cancel.check()?;
            let declared = match self.resolver.validate_exists(&PackageRef::parse(&versioned)?)? {
                Existence::Exists => versioned,
                Existence::UnsupportedOnSystem => {
                    warn!(
                        "{versioned} is not available on {}; it stays declared for other platforms",
                        self.system
                    );
                    versioned
                }
                Existence::Missing if pkg.is_catalog() && pkg.version().is_none() => {
                    if !self.resolver.legacy_exists(pkg.canonical_name())? {
                        return Err(CoreError::NotFound(pkg.raw().to_owned()));
                    }
                    pkg.raw().to_owned()
                }
                Existence::Missing => return Err(CoreError::NotFound(pkg.raw().to_owned())),
            };

            self.config.add(&declared);
            info!("adding {declared} to {CONFIG_FILE_NAME}");
            report.added.push(declared.clone());
            touched.push(declared);
        }

        for raw in &touched {
            let dropped = self.config.add_platforms(raw, &options.platforms)?;
            if !dropped.is_empty() {
                warn!("{raw}: platform allow-list replaces exclusions {dropped:?}");
            }
            let dropped = self.config.exclude_platforms(raw, &options.exclude_platforms)?;
            if !dropped.is_empty() {
                warn!("{raw}: platform exclusions replace allow-list {dropped:?}");
            }
            if options.disable_plugin {
                self.config.set_disable_plugin(raw, true)?;
            }
            if options.patch_glibc {
                self.config.set_patch_glibc(raw, true)?;
            }
            if options.allow_insecure {
                self.resolver
                    .locked_or_resolve(self.store.lockfile_mut(), raw)?;
                if let Some(entry) = self.store.lockfile_mut().get_mut(raw) {
                    entry.allow_insecure = true;
                }
            }
        }

        if !report.replaced.is_empty() {
            // Recreated by reconcile for the new version when it has a plugin.
            self.collab
                .plugins
                .remove(&self.store.layout().virtenv_dir(), &report.replaced)?;
        }

        report.reconcile = self
            .reconcile(InstallMode::Install)
            .map_err(CoreError::into_installation)?;
        self.save_config()?;

        for raw in &report.added {
            if self.config.get(raw).is_some_and(|e| e.disable_plugin) {
                continue;
            }
            if let Ok(pkg) = PackageRef::parse(raw) {
                if let Some(readme) = self.collab.plugins.readme(&pkg) {
                    report.readmes.push((raw.clone(), readme));
                }
            }
        }
        Ok(report)
    }

    pub fn remove(&mut self, names: &[String]) -> Result<RemoveReport, CoreError> {
        self.transaction(|engine| engine.remove_packages(names))
    }

    fn remove_packages(&mut self, names: &[String]) -> Result<RemoveReport, CoreError> {
        let mut report = RemoveReport::default();
        let mut targets: Vec<String> = Vec::new();
        for name in names {
            match self.config.find_by_name(name)? {
                Some(entry) => {
                    if !targets.contains(&entry.name) {
                        targets.push(entry.name.clone());
                    }
                }
                None => {
                    warn!("{name} is not in {CONFIG_FILE_NAME}");
                    report.missing.push(name.clone());
                }
            }
        }
        if targets.is_empty() {
            return Ok(report);
        }

        for raw in &targets {
            self.config.remove(raw);
        }
        report.reconcile = Some(
            self.reconcile(InstallMode::Uninstall)
                .map_err(CoreError::into_installation)?,
        );
        self.save_config()?;

        if let Err(e) = self
            .collab
            .plugins
            .remove(&self.store.layout().virtenv_dir(), &targets)
        {
            warn!("failed to remove plugin directories: {e}");
        }
        for raw in &targets {
            info!("removed {raw} from {CONFIG_FILE_NAME}");
        }
        report.removed = targets;
        Ok(report)
    }

    /// Re-resolve `names`, or every catalog and release package when empty.
    pub fn update(&mut self, names: &[String]) -> Result<UpdateReport, CoreError> {
        self.transaction(|engine| engine.update_packages(names))
    }

    fn update_packages(&mut self, names: &[String]) -> Result<UpdateReport, CoreError> {
        let targets: Vec<PackageRef> = if names.is_empty() {
            self.config
                .packages
                .iter()
                .map(PackageEntry::package_ref)
                .collect::<Result<Vec<_>, _>>()?
        } else {
            let mut refs = Vec::new();
            for name in names {
                let entry = self
                    .config
                    .find_by_name(name)?
                    .ok_or_else(|| CoreError::NotFound(name.clone()))?;
                refs.push(entry.package_ref()?);
            }
            refs
        };

        let mut report = UpdateReport::default();
        let mut release_versions = Vec::new();
        for pkg in targets {
            if !pkg.is_catalog() && !pkg.is_release() {
                debug!("{pkg} is a direct installable, nothing to update");
                continue;
            }
            self.options.cancel.check()?;
            let before = self
                .store
                .lockfile()
                .get(pkg.raw())
                .map(|e| e.version.clone())
                .unwrap_or_default();
            match self.resolver.update(self.store.lockfile_mut(), &pkg)? {
                Some(change) => {
                    info!("{}: {} -> {}", change.name, change.from, change.to);
                    report.changes.push(change);
                }
                None if pkg.is_release() => release_versions.push((pkg, before)),
                None => debug!("{pkg} is already up to date"),
            }
        }

        report.reconcile = self
            .reconcile(InstallMode::Update)
            .map_err(CoreError::into_installation)?;

        // Unpinned releases only learn their new version while installing.
        for (pkg, before) in release_versions {
            let after = self
                .store
                .lockfile()
                .get(pkg.raw())
                .map(|e| e.version.clone())
                .unwrap_or_default();
            if after != before {
                report.changes.push(VersionChange {
                    name: pkg.raw().to_owned(),
                    from: before,
                    to: after,
                });
            }
        }
        Ok(report)
    }

    /// Make lockfile and profile match the declared packages.
    pub fn install(&mut self) -> Result<ReconcileReport, CoreError> {
        self.transaction(|engine| {
            engine
                .reconcile(InstallMode::Ensure)
                .map_err(CoreError::into_installation)
        })
    }

    pub fn list(&self) -> Vec<ListEntry> {
        self.config
            .packages
            .iter()
            .map(|entry| {
                let locked = self.store.lockfile().get(&entry.name);
                ListEntry {
                    name: entry.name.clone(),
                    version: locked
                        .map(|l| l.version.clone())
                        .filter(|v| !v.is_empty()),
                    locator: locked.map(|l| l.resolved.to_string()),
                    enabled: entry.is_enabled_on(&self.system),
                    uninstallable: locked.is_some_and(|l| l.uninstallable),
                }
            })
            .collect()
    }

    /// Version history of a catalog package.
    pub fn info(&self, name: &str) -> Result<Option<PackageInfo>, CoreError> {
        let pkg = PackageRef::parse(name)?;
        self.resolver.search(pkg.canonical_name())
    }

    /// Bring `berth.lock` and the host profile in line with the declared
    /// packages, then commit the lockfile.
    pub fn reconcile(&mut self, mode: InstallMode) -> Result<ReconcileReport, CoreError> {
        let cancel = self.options.cancel.clone();
        let context = self.options.context;
        let layout = self.store.layout().clone();
        let pm = Arc::clone(&self.collab.package_manager);
        let mut report = ReconcileReport::default();

        layout.initialize()?;
        let _cleanup = (mode != InstallMode::Ensure && !context.session_active)
            .then(|| self.store.local_cleanup());

        cancel.check()?;
        let config_hash = self.config.content_hash();
        report.up_to_date = self.store.is_up_to_date_and_installed(&config_hash)?;
        if mode == InstallMode::Ensure && report.up_to_date {
            debug!("project is up to date");
            return Ok(report);
        }
        info!("reconciling ({mode:?})");

        let mut planned = Vec::new();
        let mut disabled = Vec::new();
        for entry in &self.config.packages {
            if !entry.is_enabled_on(&self.system) {
                disabled.push(entry.name.clone());
                continue;
            }
            cancel.check()?;
            let pkg = entry.package_ref()?;
            let mut locked = self
                .resolver
                .locked_or_resolve(self.store.lockfile_mut(), &entry.name)?;
            if locked.uninstallable {
                debug!("{} is enabled on {} again", entry.name, self.system);
                locked.uninstallable = false;
                if let Some(e) = self.store.lockfile_mut().get_mut(&entry.name) {
                    e.uninstallable = false;
                }
            }
            planned.push(Planned {
                entry: entry.clone(),
                pkg,
                locked,
            });
        }

        let profile_dir = layout.profile_dir();
        let desired: Vec<DesiredPackage> = planned
            .iter()
            .filter(|p| p.pkg.is_profile_managed())
            .map(|p| {
                DesiredPackage::new(
                    p.entry.name.clone(),
                    &p.locked.resolved,
                    p.locked.store_paths(&self.system).to_vec(),
                )
            })
            .collect();
        let syncs_profile = mode == InstallMode::Ensure || context.session_active;
        if syncs_profile {
            self.options.process.reset_profile_dir_once(&profile_dir);
        }
        let items = pm.profile_list(&profile_dir)?;
        let missing = packages_to_install(&desired, &items);
        self.validator
            .fill_cache(missing.iter().flat_map(|d| d.store_paths.iter()))?;
        for pkg in &missing {
            cancel.check()?;
            if let Some(p) = planned.iter().find(|p| p.entry.name == pkg.raw) {
                self.validator.validate(&pkg.raw, &p.locked, &self.system)?;
                report.validated.push(pkg.raw.clone());
            }
        }

        let virtenv = layout.virtenv_dir();
        for p in planned.iter().filter(|p| !p.entry.disable_plugin) {
            self.collab.plugins.create(&virtenv, &p.pkg)?;
        }

        let release_dir = layout.release_dir();
        for p in planned.iter().filter(|p| p.pkg.is_release()) {
            cancel.check()?;
            let repo = p
                .pkg
                .canonical_name()
                .strip_prefix(RELEASE_PREFIX)
                .unwrap_or(p.pkg.canonical_name());
            let locked_version = self
                .store
                .lockfile()
                .get(&p.entry.name)
                .map(|e| e.version.clone())
                .filter(|v| !v.is_empty());
            let version = p.pkg.version().map(str::to_owned).or(locked_version);
            let installed = self
                .collab
                .releases
                .install(repo, version.as_deref(), &release_dir)?;
            info!("installed {} {}", p.entry.name, installed.version);
            if let Some(e) = self.store.lockfile_mut().get_mut(&p.entry.name) {
                e.version = installed.version;
            }
            report.releases_installed.push(p.entry.name.clone());
        }

        let insecure: Vec<String> = planned
            .iter()
            .filter(|p| p.locked.allow_insecure && p.pkg.is_profile_managed())
            .map(|p| p.locked.resolved.to_string())
            .collect();
        if !insecure.is_empty() {
            pm.allow_insecure(&insecure)?;
        }
        let spec = EnvSpec {
            system: self.system.clone(),
            nixpkgs_commit: self.config.nixpkgs_commit().to_owned(),
            packages: planned
                .iter()
                .filter(|p| p.pkg.is_profile_managed())
                .map(|p| EnvPackage {
                    name: p.entry.name.clone(),
                    locator: p.locked.resolved.clone(),
                    store_paths: p.locked.store_paths(&self.system).to_vec(),
                    allow_insecure: p.locked.allow_insecure,
                    patch_glibc: p.entry.patch_glibc,
                })
                .collect(),
        };
        cancel.check()?;
        self.collab
            .env_generator
            .generate(&layout.gen_dir(), &spec)?;

        report.removed_symlinks = self.collab.plugins.remove_invalid_symlinks(&virtenv)?;

        if syncs_profile {
            cancel.check()?;
            let env = pm.print_dev_env(&layout.gen_dir())?;
            let wanted: Vec<StorePath> = env
                .get(BUILD_INPUTS_VAR)
                .map(|inputs| inputs.split_whitespace().map(StorePath::new).collect())
                .unwrap_or_default();
            let items = pm.profile_list(&profile_dir)?;
            let plan = plan_sync(&wanted, &items);
            cancel.check()?;
            pm.profile_remove(&profile_dir, &plan.remove)?;
            let installables: Vec<String> = plan.install.iter().map(ToString::to_string).collect();
            pm.profile_install(&profile_dir, &installables)?;
            report.profile_removed = plan.remove.into_iter().map(|i| i.name).collect();
            report.profile_installed = installables;
        } else if matches!(mode, InstallMode::Install | InstallMode::Update) {
            let delta: Vec<String> = missing.iter().map(|d| d.installable.clone()).collect();
            if !delta.is_empty() {
                cancel.check()?;
                pm.build(&delta)?;
            }
            report.built = delta;
        }

        report.pruned = self.store.tidy(&self.config.package_names());
        for raw in &disabled {
            let resolver = &mut self.resolver;
            let changed = self.store.ensure_uninstallable(
                raw,
                || -> Result<LockedPackage, CoreError> {
                    let pkg = PackageRef::parse(raw)?;
                    resolver.resolve(&pkg)
                },
            )?;
            if changed {
                debug!("{raw} marked uninstallable on {}", self.system);
                report.marked_uninstallable.push(raw.clone());
            }
        }

        if context.session_active && !report.up_to_date && !context.auto_reload_active {
            let msg = "your shell environment is out of date; re-enter the berth shell to pick up the changes";
            warn!("{msg}");
            report.warnings.push(msg.to_owned());
        }

        cancel.check()?;
        self.store.save(&config_hash)?;
        Ok(report)
    }
}
