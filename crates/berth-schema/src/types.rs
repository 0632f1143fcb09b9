//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Resolved installable of a package, e.g. `github:NixOS/nixpkgs/<rev>#go_1_21`.
    Locator
);

string_newtype!(
    /// Absolute path of a build output in the package store.
    StorePath
);

string_newtype!(
    /// Blake3 hex digest of serialized content.
    ContentHash
);

impl StorePath {
    /// The hash component of the basename (`/nix/store/<hash>-name` → `<hash>`).
    pub fn hash_part(&self) -> Option<&str> {
        let base = self.0.rsplit('/').next()?;
        let (hash, _) = base.split_once('-')?;
        (!hash.is_empty()).then_some(hash)
    }
}

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_display_and_as_ref() {
        let l = Locator::new("github:NixOS/nixpkgs/abc#hello");
        assert_eq!(l.to_string(), "github:NixOS/nixpkgs/abc#hello");
        assert_eq!(AsRef::<str>::as_ref(&l), "github:NixOS/nixpkgs/abc#hello");
    }

    #[test]
    fn store_path_serde_is_transparent() {
        let p = StorePath::new("/nix/store/abc-hello-2.12");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"/nix/store/abc-hello-2.12\"");
        let back: StorePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn store_path_hash_part() {
        let p = StorePath::new("/nix/store/0c0jm2n1rs4zjkw6ngdhyqchj1nj9bnn-hello-2.12.1");
        assert_eq!(p.hash_part(), Some("0c0jm2n1rs4zjkw6ngdhyqchj1nj9bnn"));
        assert_eq!(StorePath::new("/nix/store/nodash").hash_part(), None);
    }

    #[test]
    fn content_hash_is_deterministic() {
        assert_eq!(ContentHash::of(b"abc"), ContentHash::of(b"abc"));
        assert_ne!(ContentHash::of(b"abc"), ContentHash::of(b"abd"));
        assert_eq!(ContentHash::of(b"abc").len(), 64);
    }
}
