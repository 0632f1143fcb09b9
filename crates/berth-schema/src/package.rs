use crate::SchemaError;
use std::fmt;

/// Version used when a catalog reference carries no explicit version.
pub const LATEST: &str = "latest";

const RELEASE_PREFIX: &str = "bin:";

/// How a package reference is sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageKind {
    /// `name` or `name@version`, resolved through the remote package index.
    Catalog,
    /// A direct installable (`github:owner/repo#attr`, `./path#attr`, ...).
    Flake,
    /// `bin:owner/repo[@version]`, installed outside the profile.
    Release,
}

/// A raw package reference as written in the declared package list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageRef {
    raw: String,
    kind: PackageKind,
    name: String,
    version: Option<String>,
}

impl PackageRef {
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SchemaError::EmptyReference);
        }

        if let Some(rest) = raw.strip_prefix(RELEASE_PREFIX) {
            let (repo, version) = split_version(rest);
            if repo.split('/').filter(|s| !s.is_empty()).count() != 2 {
                return Err(SchemaError::InvalidReference(raw.to_owned()));
            }
            return Ok(Self {
                raw: raw.to_owned(),
                kind: PackageKind::Release,
                name: format!("{RELEASE_PREFIX}{repo}"),
                version: version.map(str::to_owned),
            });
        }

        if raw.contains(':') || raw.contains('#') || raw.starts_with('.') || raw.starts_with('/')
        {
            return Ok(Self {
                raw: raw.to_owned(),
                kind: PackageKind::Flake,
                name: raw.to_owned(),
                version: None,
            });
        }

        let (name, version) = split_version(raw);
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(SchemaError::InvalidReference(raw.to_owned()));
        }
        Ok(Self {
            raw: raw.to_owned(),
            kind: PackageKind::Catalog,
            name: name.to_owned(),
            version: version.map(str::to_owned),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> PackageKind {
        self.kind
    }

    /// Version-stripped identity used for replace-on-add.
    pub fn canonical_name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// The version to ask the index for; `latest` when none was given.
    pub fn version_or_latest(&self) -> &str {
        self.version.as_deref().unwrap_or(LATEST)
    }

    /// `name@version` for catalog references, the raw spelling otherwise.
    pub fn versioned(&self) -> String {
        match self.kind {
            PackageKind::Catalog if self.version.is_none() => format!("{}@{LATEST}", self.name),
            _ => self.raw.clone(),
        }
    }

    pub fn is_catalog(&self) -> bool {
        self.kind == PackageKind::Catalog
    }

    pub fn is_release(&self) -> bool {
        self.kind == PackageKind::Release
    }

    /// Whether this reference is installed into the host profile.
    pub fn is_profile_managed(&self) -> bool {
        self.kind != PackageKind::Release
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// The name part may itself start with '@' (scoped names), so split on the last
// '@' that is not the first character.
fn split_version(s: &str) -> (&str, Option<&str>) {
    match s.rfind('@') {
        Some(idx) if idx > 0 && idx + 1 < s.len() => (&s[..idx], Some(&s[idx + 1..])),
        Some(idx) if idx > 0 => (&s[..idx], None),
        _ => (s, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_reference_with_version() {
        let p = PackageRef::parse("go@1.21").unwrap();
        assert_eq!(p.kind(), PackageKind::Catalog);
        assert_eq!(p.canonical_name(), "go");
        assert_eq!(p.version(), Some("1.21"));
        assert_eq!(p.versioned(), "go@1.21");
    }

    #[test]
    fn catalog_reference_without_version_is_latest() {
        let p = PackageRef::parse("ripgrep").unwrap();
        assert_eq!(p.canonical_name(), "ripgrep");
        assert_eq!(p.version(), None);
        assert_eq!(p.version_or_latest(), LATEST);
        assert_eq!(p.versioned(), "ripgrep@latest");
    }

    #[test]
    fn trailing_at_is_ignored() {
        let p = PackageRef::parse("hello@").unwrap();
        assert_eq!(p.canonical_name(), "hello");
        assert_eq!(p.version(), None);
    }

    #[test]
    fn flake_references_are_their_own_identity() {
        for raw in [
            "github:NixOS/nixpkgs/nixos-unstable#hello",
            "./local-flake#tool",
            "/abs/flake#x",
            "nixpkgs#cowsay",
        ] {
            let p = PackageRef::parse(raw).unwrap();
            assert_eq!(p.kind(), PackageKind::Flake, "{raw}");
            assert_eq!(p.canonical_name(), raw);
            assert_eq!(p.versioned(), raw);
        }
    }

    #[test]
    fn release_reference() {
        let p = PackageRef::parse("bin:cli/cli@v2.40.0").unwrap();
        assert_eq!(p.kind(), PackageKind::Release);
        assert_eq!(p.canonical_name(), "bin:cli/cli");
        assert_eq!(p.version(), Some("v2.40.0"));
        assert!(!p.is_profile_managed());
    }

    #[test]
    fn release_reference_requires_owner_and_repo() {
        assert!(PackageRef::parse("bin:justrepo").is_err());
    }

    #[test]
    fn empty_reference_rejected() {
        assert!(matches!(
            PackageRef::parse("   "),
            Err(SchemaError::EmptyReference)
        ));
    }
}
