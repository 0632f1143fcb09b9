use crate::RuntimeError;
use berth_schema::PackageRef;
use std::fs;
use std::path::Path;

/// A built-in plugin: environment and notes for a well-known package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plugin {
    pub name: &'static str,
    pub description: &'static str,
    /// `KEY=value` lines; `{virtenv}` expands to the plugin directory.
    pub env: &'static [(&'static str, &'static str)],
    pub readme: &'static str,
}

pub const BUILTIN_PLUGINS: &[Plugin] = &[
    Plugin {
        name: "postgresql",
        description: "PostgreSQL data directory and connection settings",
        env: &[("PGDATA", "{virtenv}/data"), ("PGHOST", "{virtenv}")],
        readme: "postgresql: initialize the database with `initdb`, then start it with \
                 `pg_ctl start`. Data lives in .berth/virtenv/postgresql/data.",
    },
    Plugin {
        name: "redis",
        description: "Redis configuration and data directory",
        env: &[("REDIS_CONF", "{virtenv}/redis.conf"), ("REDIS_PORT", "6379")],
        readme: "redis: start the server with `redis-server $REDIS_CONF`.",
    },
    Plugin {
        name: "nginx",
        description: "nginx configuration and runtime directory",
        env: &[("NGINX_CONFDIR", "{virtenv}/conf"), ("NGINX_PATH_PREFIX", "{virtenv}/run")],
        readme: "nginx: configuration lives in .berth/virtenv/nginx/conf; start with \
                 `nginx -p $NGINX_PATH_PREFIX -c $NGINX_CONFDIR/nginx.conf`.",
    },
    Plugin {
        name: "php",
        description: "PHP ini and extension directory",
        env: &[("PHPRC", "{virtenv}/php.ini"), ("PHP_INI_SCAN_DIR", "{virtenv}/conf.d")],
        readme: "php: add ini overrides to .berth/virtenv/php/conf.d.",
    },
];

const ENV_FILE: &str = "env";
const README_FILE: &str = "README.md";

/// Per-package plugin directories under `.berth/virtenv`.
pub trait PluginManager: Send + Sync {
    /// Ensure the plugin directory for `pkg` exists. Returns `false` when no
    /// plugin applies. Idempotent.
    fn create(&self, virtenv: &Path, pkg: &PackageRef) -> Result<bool, RuntimeError>;

    /// Remove the plugin directories of the given raw references.
    fn remove(&self, virtenv: &Path, names: &[String]) -> Result<(), RuntimeError>;

    /// Delete symlinks under `virtenv` whose target no longer exists.
    fn remove_invalid_symlinks(&self, virtenv: &Path) -> Result<usize, RuntimeError>;

    fn readme(&self, pkg: &PackageRef) -> Option<String>;
}

/// [`PluginManager`] over [`BUILTIN_PLUGINS`].
#[derive(Debug, Default)]
pub struct BuiltinPlugins;

impl BuiltinPlugins {
    pub fn new() -> Self {
        Self
    }

    /// The plugin for `pkg`: exact canonical name, or a variant such as
    /// `postgresql_15`.
    pub fn find(pkg: &PackageRef) -> Option<&'static Plugin> {
        if !pkg.is_catalog() {
            return None;
        }
        let name = pkg.canonical_name();
        BUILTIN_PLUGINS.iter().find(|p| {
            name == p.name
                || name
                    .strip_prefix(p.name)
                    .is_some_and(|rest| rest.starts_with('_'))
        })
    }
}

fn write_if_changed(path: &Path, content: &str) -> Result<(), RuntimeError> {
    if fs::read_to_string(path).is_ok_and(|old| old == content) {
        return Ok(());
    }
    fs::write(path, content)?;
    Ok(())
}

impl PluginManager for BuiltinPlugins {
    fn create(&self, virtenv: &Path, pkg: &PackageRef) -> Result<bool, RuntimeError> {
        let Some(plugin) = Self::find(pkg) else {
            return Ok(false);
        };
        let dir = virtenv.join(plugin.name);
        fs::create_dir_all(&dir)?;
        let dir_str = dir.to_string_lossy();
        let env: String = plugin
            .env
            .iter()
            .map(|(k, v)| format!("{k}={}\n", v.replace("{virtenv}", &dir_str)))
            .collect();
        write_if_changed(&dir.join(ENV_FILE), &env)?;
        write_if_changed(&dir.join(README_FILE), plugin.readme)?;
        tracing::debug!("plugin {} ready in {}", plugin.name, dir.display());
        Ok(true)
    }

    fn remove(&self, virtenv: &Path, names: &[String]) -> Result<(), RuntimeError> {
        for name in names {
            let pkg = PackageRef::parse(name).map_err(|e| RuntimeError::Plugin(e.to_string()))?;
            let Some(plugin) = Self::find(&pkg) else {
                continue;
            };
            let dir = virtenv.join(plugin.name);
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
                tracing::debug!("removed plugin {}", plugin.name);
            }
        }
        Ok(())
    }

    fn remove_invalid_symlinks(&self, virtenv: &Path) -> Result<usize, RuntimeError> {
        if !virtenv.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        let mut pending = vec![virtenv.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                let meta = fs::symlink_metadata(&path)?;
                if meta.file_type().is_symlink() {
                    if fs::metadata(&path).is_err() {
                        fs::remove_file(&path)?;
                        removed += 1;
                    }
                } else if meta.is_dir() {
                    pending.push(path);
                }
            }
        }
        Ok(removed)
    }

    fn readme(&self, pkg: &PackageRef) -> Option<String> {
        Self::find(pkg).map(|p| p.readme.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(raw: &str) -> PackageRef {
        PackageRef::parse(raw).unwrap()
    }

    #[test]
    fn builtin_plugins_have_unique_names() {
        let mut names: Vec<&str> = BUILTIN_PLUGINS.iter().map(|p| p.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), BUILTIN_PLUGINS.len());
    }

    #[test]
    fn find_matches_canonical_and_variants() {
        assert_eq!(BuiltinPlugins::find(&pkg("postgresql@15")).unwrap().name, "postgresql");
        assert_eq!(BuiltinPlugins::find(&pkg("postgresql_15")).unwrap().name, "postgresql");
        assert!(BuiltinPlugins::find(&pkg("postgresqlx")).is_none());
        assert!(BuiltinPlugins::find(&pkg("github:acme/redis")).is_none());
        assert!(BuiltinPlugins::find(&pkg("hello")).is_none());
    }

    #[test]
    fn create_is_idempotent_and_expands_env() {
        let dir = tempfile::tempdir().unwrap();
        let plugins = BuiltinPlugins::new();
        assert!(plugins.create(dir.path(), &pkg("redis@7")).unwrap());
        assert!(plugins.create(dir.path(), &pkg("redis@7")).unwrap());
        let env = fs::read_to_string(dir.path().join("redis").join(ENV_FILE)).unwrap();
        assert!(env.contains(&format!(
            "REDIS_CONF={}/redis.conf",
            dir.path().join("redis").display()
        )));
        assert!(!plugins.create(dir.path(), &pkg("hello")).unwrap());
        assert!(!dir.path().join("hello").exists());
    }

    #[test]
    fn remove_deletes_plugin_dir() {
        let dir = tempfile::tempdir().unwrap();
        let plugins = BuiltinPlugins::new();
        plugins.create(dir.path(), &pkg("nginx")).unwrap();
        plugins
            .remove(dir.path(), &["nginx@1.25".to_owned(), "hello".to_owned()])
            .unwrap();
        assert!(!dir.path().join("nginx").exists());
    }

    #[cfg(unix)]
    #[test]
    fn remove_invalid_symlinks_keeps_valid_ones() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("php").join("bin");
        fs::create_dir_all(&nested).unwrap();
        let target = dir.path().join("target");
        fs::write(&target, "x").unwrap();
        std::os::unix::fs::symlink(&target, nested.join("good")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), nested.join("bad")).unwrap();

        let removed = BuiltinPlugins::new()
            .remove_invalid_symlinks(dir.path())
            .unwrap();
        assert_eq!(removed, 1);
        assert!(fs::symlink_metadata(nested.join("good")).is_ok());
        assert!(fs::symlink_metadata(nested.join("bad")).is_err());
    }

    #[test]
    fn readme_for_known_plugin() {
        let plugins = BuiltinPlugins::new();
        assert!(plugins.readme(&pkg("postgresql")).unwrap().contains("initdb"));
        assert!(plugins.readme(&pkg("hello")).is_none());
    }
}
