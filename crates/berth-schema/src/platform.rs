use crate::SchemaError;

/// Platforms a package may be restricted to or excluded from.
pub const SUPPORTED_PLATFORMS: &[&str] = &[
    "i686-linux",
    "aarch64-linux",
    "aarch64-darwin",
    "x86_64-darwin",
    "x86_64-linux",
    "armv7l-linux",
];

/// The platform string of the running host, e.g. `x86_64-linux`.
pub fn current_system() -> String {
    let arch = match std::env::consts::ARCH {
        "x86" => "i686",
        "arm" => "armv7l",
        other => other,
    };
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    format!("{arch}-{os}")
}

pub fn ensure_valid_platforms<S: AsRef<str>>(platforms: &[S]) -> Result<(), SchemaError> {
    for platform in platforms {
        let platform = platform.as_ref();
        if !SUPPORTED_PLATFORMS.contains(&platform) {
            return Err(SchemaError::UnsupportedPlatform {
                platform: platform.to_owned(),
                supported: SUPPORTED_PLATFORMS.join(", "),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_system_has_arch_and_os() {
        let sys = current_system();
        let (arch, os) = sys.split_once('-').unwrap();
        assert!(!arch.is_empty());
        assert!(!os.is_empty());
        assert_ne!(os, "macos");
    }

    #[test]
    fn known_platforms_validate() {
        assert!(ensure_valid_platforms(&["x86_64-linux", "aarch64-darwin"]).is_ok());
    }

    #[test]
    fn unknown_platform_rejected() {
        let err = ensure_valid_platforms(&["x86_64-windows"]).unwrap_err();
        assert!(err.to_string().contains("x86_64-windows"));
    }
}
