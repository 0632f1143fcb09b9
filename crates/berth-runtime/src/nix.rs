use crate::backend::{PackageManager, ProfileItem};
use crate::RuntimeError;
use berth_schema::{current_system, Locator, StorePath};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::process::{Command, Output};
use std::sync::Mutex;

const EXPERIMENTAL: [&str; 2] = ["--extra-experimental-features", "nix-command flakes"];

/// Drives the `nix` CLI.
pub struct NixBackend {
    insecure: Mutex<HashSet<String>>,
}

impl Default for NixBackend {
    fn default() -> Self {
        Self {
            insecure: Mutex::new(HashSet::new()),
        }
    }
}

impl NixBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn command(&self, installables: &[String]) -> Command {
        let mut cmd = Command::new("nix");
        cmd.args(EXPERIMENTAL);
        let insecure = self
            .insecure
            .lock()
            .is_ok_and(|set| installables.iter().any(|i| set.contains(i)));
        if insecure {
            cmd.env("NIXPKGS_ALLOW_INSECURE", "1").arg("--impure");
        }
        cmd
    }

    fn run(mut cmd: Command) -> Result<Output, RuntimeError> {
        tracing::debug!("running {cmd:?}");
        let output = cmd
            .output()
            .map_err(|e| RuntimeError::ExecFailed(format!("failed to run nix: {e}")))?;
        if !output.status.success() {
            return Err(RuntimeError::ExecFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            ));
        }
        Ok(output)
    }

    /// Like [`run`](Self::run), but a non-zero exit is an answer, not an error.
    fn succeeds(mut cmd: Command) -> Result<bool, RuntimeError> {
        tracing::debug!("probing {cmd:?}");
        cmd.output()
            .map(|o| o.status.success())
            .map_err(|e| RuntimeError::ExecFailed(format!("failed to run nix: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct RawElement {
    #[serde(default, rename = "originalUrl")]
    original_url: Option<String>,
    #[serde(default, rename = "attrPath")]
    attr_path: Option<String>,
    #[serde(default, rename = "storePaths")]
    store_paths: Vec<String>,
}

impl RawElement {
    fn locator(&self) -> Option<Locator> {
        match (&self.original_url, &self.attr_path) {
            (Some(url), Some(attr)) => Some(Locator::new(format!("{url}#{attr}"))),
            (Some(url), None) => Some(Locator::new(url.as_str())),
            _ => None,
        }
    }

    fn fallback_name(&self) -> String {
        if let Some(attr) = &self.attr_path {
            return attr.rsplit('.').next().unwrap_or(attr).to_owned();
        }
        self.store_paths
            .first()
            .and_then(|p| p.rsplit('/').next())
            .and_then(|base| base.split_once('-'))
            .map(|(_, name)| name.to_owned())
            .unwrap_or_default()
    }

    fn into_item(self, index: usize, name: Option<String>) -> ProfileItem {
        let locator = self.locator();
        let name = name.unwrap_or_else(|| self.fallback_name());
        ProfileItem {
            index,
            name,
            locator,
            store_paths: self.store_paths.into_iter().map(StorePath::new).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawElements {
    Named(BTreeMap<String, RawElement>),
    Indexed(Vec<RawElement>),
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    elements: RawElements,
}

/// Parse `nix profile list --json`, either the keyed (v3) or the indexed
/// (v2) form.
pub fn parse_profile_list(json: &str) -> Result<Vec<ProfileItem>, RuntimeError> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let raw: RawProfile = serde_json::from_str(json)
        .map_err(|e| RuntimeError::InvalidOutput(format!("nix profile list: {e}")))?;
    Ok(match raw.elements {
        RawElements::Named(map) => map
            .into_iter()
            .enumerate()
            .map(|(i, (name, e))| e.into_item(i, Some(name)))
            .collect(),
        RawElements::Indexed(list) => list
            .into_iter()
            .enumerate()
            .map(|(i, e)| e.into_item(i, None))
            .collect(),
    })
}

#[derive(Debug, Deserialize)]
struct DevEnvVariable {
    #[serde(rename = "type")]
    kind: String,
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct DevEnv {
    variables: BTreeMap<String, DevEnvVariable>,
}

/// String variables of `nix print-dev-env --json`.
pub fn parse_dev_env(json: &str) -> Result<BTreeMap<String, String>, RuntimeError> {
    let env: DevEnv = serde_json::from_str(json)
        .map_err(|e| RuntimeError::InvalidOutput(format!("nix print-dev-env: {e}")))?;
    Ok(env
        .variables
        .into_iter()
        .filter(|(_, v)| v.kind == "exported" || v.kind == "var")
        .filter_map(|(k, v)| v.value.as_str().map(|s| (k, s.to_owned())))
        .collect())
}

impl PackageManager for NixBackend {
    fn name(&self) -> &'static str {
        "nix"
    }

    fn available(&self) -> bool {
        Command::new("nix")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn system(&self) -> String {
        current_system()
    }

    fn profile_list(&self, profile: &Path) -> Result<Vec<ProfileItem>, RuntimeError> {
        if !profile.exists() {
            return Ok(Vec::new());
        }
        let mut cmd = self.command(&[]);
        cmd.args(["profile", "list", "--json", "--profile"]).arg(profile);
        let output = Self::run(cmd)?;
        parse_profile_list(&String::from_utf8_lossy(&output.stdout))
    }

    fn profile_install(&self, profile: &Path, installables: &[String]) -> Result<(), RuntimeError> {
        if installables.is_empty() {
            return Ok(());
        }
        if let Some(parent) = profile.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut cmd = self.command(installables);
        cmd.args(["profile", "install", "--profile"])
            .arg(profile)
            .args(installables);
        Self::run(cmd).map(|_| ())
    }

    fn profile_remove(&self, profile: &Path, items: &[ProfileItem]) -> Result<(), RuntimeError> {
        if items.is_empty() {
            return Ok(());
        }
        let mut cmd = self.command(&[]);
        cmd.args(["profile", "remove", "--profile"]).arg(profile);
        for item in items {
            cmd.arg(&item.name);
        }
        Self::run(cmd).map(|_| ())
    }

    fn build(&self, installables: &[String]) -> Result<(), RuntimeError> {
        if installables.is_empty() {
            return Ok(());
        }
        let mut cmd = self.command(installables);
        cmd.args(["build", "--no-link"]).args(installables);
        Self::run(cmd).map(|_| ())
    }

    fn exists(&self, installable: &str) -> Result<bool, RuntimeError> {
        let mut cmd = self.command(&[]);
        if installable.contains('#') {
            cmd.args(["eval", "--raw"]).arg(format!("{installable}.name"));
        } else {
            cmd.args(["flake", "metadata", "--json", installable]);
        }
        Self::succeeds(cmd)
    }

    fn installs_on_system(&self, installable: &str) -> Result<bool, RuntimeError> {
        let mut cmd = self.command(&[installable.to_owned()]);
        cmd.args(["eval", "--json", installable, "--apply"])
            .arg("p: p.meta.available or true");
        let output = Self::run(cmd)?;
        let text = String::from_utf8_lossy(&output.stdout);
        match text.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(RuntimeError::InvalidOutput(format!(
                "meta.available of {installable}: {other}"
            ))),
        }
    }

    fn prefetch(&self, flake_ref: &str) -> Result<(), RuntimeError> {
        let mut cmd = self.command(&[]);
        cmd.args(["flake", "prefetch", flake_ref]);
        Self::run(cmd).map(|_| ())
    }

    fn print_dev_env(&self, gen_dir: &Path) -> Result<BTreeMap<String, String>, RuntimeError> {
        let mut cmd = self.command(&[]);
        cmd.args(["print-dev-env", "--impure", "--json"]).arg(gen_dir);
        let output = Self::run(cmd)?;
        parse_dev_env(&String::from_utf8_lossy(&output.stdout))
    }

    fn allow_insecure(&self, installables: &[String]) -> Result<(), RuntimeError> {
        let mut set = self
            .insecure
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
        set.extend(installables.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keyed_profile() {
        let json = r#"{
            "version": 3,
            "elements": {
                "go_1_21": {
                    "active": true,
                    "originalUrl": "github:NixOS/nixpkgs/abc",
                    "attrPath": "legacyPackages.x86_64-linux.go_1_21",
                    "storePaths": ["/nix/store/aaa-go-1.21.5"]
                },
                "hello": {
                    "storePaths": ["/nix/store/bbb-hello-2.12"]
                }
            }
        }"#;
        let items = parse_profile_list(json).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "go_1_21");
        assert_eq!(
            items[0].locator.as_ref().unwrap(),
            "github:NixOS/nixpkgs/abc#legacyPackages.x86_64-linux.go_1_21"
        );
        assert_eq!(items[1].index, 1);
        assert!(items[1].locator.is_none());
    }

    #[test]
    fn parse_indexed_profile() {
        let json = r#"{
            "version": 2,
            "elements": [
                {"storePaths": ["/nix/store/bbb-hello-2.12"]}
            ]
        }"#;
        let items = parse_profile_list(json).unwrap();
        assert_eq!(items[0].name, "hello-2.12");
        assert_eq!(items[0].index, 0);
    }

    #[test]
    fn parse_empty_profile_output() {
        assert!(parse_profile_list("").unwrap().is_empty());
        assert!(parse_profile_list("not json").is_err());
    }

    #[test]
    fn parse_dev_env_keeps_string_variables() {
        let json = r#"{
            "variables": {
                "buildInputs": {"type": "var", "value": "/nix/store/aaa-go /nix/store/bbb-hello"},
                "PATH": {"type": "exported", "value": "/nix/store/aaa-go/bin"},
                "shellHook": {"type": "var", "value": ""},
                "outputs": {"type": "array", "value": ["out"]}
            }
        }"#;
        let vars = parse_dev_env(json).unwrap();
        assert_eq!(vars["buildInputs"], "/nix/store/aaa-go /nix/store/bbb-hello");
        assert!(vars.contains_key("PATH"));
        assert!(!vars.contains_key("outputs"));
    }

    #[test]
    fn allow_insecure_is_recorded() {
        let backend = NixBackend::new();
        backend
            .allow_insecure(&["github:NixOS/nixpkgs/abc#python27".to_owned()])
            .unwrap();
        let cmd = backend.command(&["github:NixOS/nixpkgs/abc#python27".to_owned()]);
        assert!(cmd.get_args().any(|a| a == "--impure"));
        let plain = backend.command(&["github:NixOS/nixpkgs/abc#hello".to_owned()]);
        assert!(!plain.get_args().any(|a| a == "--impure"));
    }
}
