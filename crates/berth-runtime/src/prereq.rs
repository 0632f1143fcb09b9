use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .is_ok_and(|o| o.status.success())
}

fn flakes_enabled() -> bool {
    Command::new("nix")
        .args([
            "--extra-experimental-features",
            "nix-command flakes",
            "flake",
            "--help",
        ])
        .output()
        .is_ok_and(|o| o.status.success())
}

/// Check prerequisites for the nix backend. Empty means all are met.
pub fn check_nix_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("nix") {
        missing.push(MissingPrereq {
            name: "nix",
            purpose: "installing packages into the project profile",
            install_hint: "curl -L https://nixos.org/nix/install | sh",
        });
    } else if !flakes_enabled() {
        missing.push(MissingPrereq {
            name: "nix flakes",
            purpose: "evaluating the generated environment",
            install_hint: "upgrade to nix 2.12 or newer",
        });
    }

    if !command_exists("git") {
        missing.push(MissingPrereq {
            name: "git",
            purpose: "fetching flake inputs",
            install_hint: "zypper install git | apt install git | dnf install git | pacman -S git",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nberth requires these tools to install project packages.");
    msg
}
