use crate::RuntimeError;
use berth_schema::{Locator, StorePath};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Variable of the evaluated environment listing its input store paths.
pub const BUILD_INPUTS_VAR: &str = "buildInputs";

pub const SPEC_FILE: &str = "flake.json";
pub const FLAKE_FILE: &str = "flake.nix";

/// A package as it enters the generated environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvPackage {
    pub name: String,
    pub locator: Locator,
    #[serde(default)]
    pub store_paths: Vec<StorePath>,
    #[serde(default)]
    pub allow_insecure: bool,
    #[serde(default)]
    pub patch_glibc: bool,
}

/// Input of the environment generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvSpec {
    pub system: String,
    pub nixpkgs_commit: String,
    pub packages: Vec<EnvPackage>,
}

pub trait EnvGenerator: Send + Sync {
    /// Write the environment definition under `gen_dir`; returns the file the
    /// package manager evaluates.
    fn generate(&self, gen_dir: &Path, spec: &EnvSpec) -> Result<PathBuf, RuntimeError>;
}

/// Writes a `flake.nix` with one dev shell plus the `flake.json` it was
/// rendered from.
#[derive(Debug, Default)]
pub struct FlakeGenerator;

impl FlakeGenerator {
    pub fn new() -> Self {
        Self
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), RuntimeError> {
    berth_schema::write_atomic(path, content.as_bytes())?;
    Ok(())
}

/// Nix expression for one package. Store paths pin the exact output; other
/// installables are fetched through their flake.
fn package_expr(pkg: &EnvPackage, system: &str) -> String {
    if let [path] = pkg.store_paths.as_slice() {
        return format!("(builtins.storePath \"{path}\")");
    }
    let (flake, attr) = pkg
        .locator
        .split_once('#')
        .unwrap_or((pkg.locator.as_str(), "default"));
    let attr = if attr.starts_with("legacyPackages.") || attr.starts_with("packages.") {
        attr.to_owned()
    } else if flake.starts_with("github:NixOS/nixpkgs") {
        format!("legacyPackages.{system}.{attr}")
    } else {
        format!("packages.{system}.{attr}")
    };
    format!("(builtins.getFlake \"{flake}\").{attr}")
}

/// Rewrites the ELF interpreter and rpath of a package's binaries to the
/// glibc of the pinned nixpkgs.
const PATCH_GLIBC_FN: &str = r#"      patchGlibc = drv: pkgs.runCommand "berth-glibc-patched" {
        nativeBuildInputs = [ pkgs.patchelf ];
      } ''
        cp -rL ${drv} $out
        chmod -R u+w $out
        for f in $out/bin/*; do
          patchelf --set-interpreter "$(cat ${pkgs.stdenv.cc}/nix-support/dynamic-linker)" "$f" 2>/dev/null || continue
          patchelf --set-rpath "${pkgs.glibc}/lib:$(patchelf --print-rpath "$f")" "$f"
        done
      '';
"#;

/// Name the insecure predicate matches a derivation by: the entry name
/// without version or flake prefix.
fn insecure_name(pkg: &EnvPackage) -> &str {
    let base = pkg.name.split('@').next().unwrap_or(&pkg.name);
    base.rsplit(['#', '/', ':']).next().unwrap_or(base)
}

pub fn render_flake(spec: &EnvSpec) -> String {
    let mut inputs = String::new();
    for pkg in &spec.packages {
        let expr = package_expr(pkg, &spec.system);
        if pkg.patch_glibc {
            let _ = writeln!(inputs, "          (patchGlibc {expr})");
        } else {
            let _ = writeln!(inputs, "          {expr}");
        }
    }
    let insecure: Vec<String> = spec
        .packages
        .iter()
        .filter(|p| p.allow_insecure)
        .map(|p| format!("\"{}\"", insecure_name(p)))
        .collect();
    let patch_fn = if spec.packages.iter().any(|p| p.patch_glibc) {
        PATCH_GLIBC_FN
    } else {
        ""
    };
    format!(
        r#"{{
  description = "berth generated environment";

  inputs.nixpkgs.url = "github:NixOS/nixpkgs/{commit}";

  outputs = {{ self, nixpkgs }}:
    let
      pkgs = import nixpkgs {{
        system = "{system}";
        config.allowInsecurePredicate = pkg:
          builtins.elem (builtins.parseDrvName (pkg.name or "")).name [ {insecure} ];
      }};
{patch_fn}    in {{
      devShells.{system}.default = pkgs.mkShell {{
        buildInputs = [
{inputs}        ];
      }};
    }};
}}
"#,
        commit = spec.nixpkgs_commit,
        system = spec.system,
        insecure = insecure.join(" "),
    )
}

impl EnvGenerator for FlakeGenerator {
    fn generate(&self, gen_dir: &Path, spec: &EnvSpec) -> Result<PathBuf, RuntimeError> {
        let json = serde_json::to_string_pretty(spec)?;
        write_file(&gen_dir.join(SPEC_FILE), &json)?;
        let flake = gen_dir.join(FLAKE_FILE);
        write_file(&flake, &render_flake(spec))?;
        tracing::debug!(
            "generated {} with {} packages",
            flake.display(),
            spec.packages.len()
        );
        Ok(flake)
    }
}

/// Read back the `EnvSpec` a previous [`FlakeGenerator::generate`] wrote.
pub fn read_spec(gen_dir: &Path) -> Result<EnvSpec, RuntimeError> {
    let path = gen_dir.join(SPEC_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RuntimeError::EnvNotGenerated(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&content)?)
}
