//! Preflight checks for host tools.
//!
//! Runs before any stage so a missing tool is reported once, together with
//! the package that provides it, instead of as a spawn failure halfway
//! through a build.
//!
//! # Example
//!
//! ```rust
//! use router_kernel::preflight::{check_required_tools, command_exists, PIPELINE_TOOLS};
//!
//! if !command_exists("make") {
//!     println!("build-essential not installed");
//! }
//!
//! if let Err(e) = check_required_tools(PIPELINE_TOOLS) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

use crate::profile::{BuilderSource, BuildProfile};

/// Check if a command exists on the host's PATH.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Host tools the kernel pipeline shells out to.
///
/// Each tuple is (command_name, package_name).
pub const PIPELINE_TOOLS: &[(&str, &str)] = &[
    ("tar", "tar"),
    ("xz", "xz-utils"),
    ("patch", "patch"),
    ("make", "build-essential"),
];

/// Host tools a containerized rebuild needs for `profile`.
pub fn rebuild_tools(profile: &BuildProfile) -> Vec<(&str, &str)> {
    let engine = profile.container.engine.as_str();
    let package = match engine {
        "docker" => "docker.io",
        other => other,
    };
    let mut tools = vec![(engine, package)];
    if matches!(profile.container.builder, BuilderSource::CargoTarget(_)) {
        tools.push(("cargo", "cargo"));
    }
    tools
}

/// Check that specific tools are available.
///
/// Returns an error listing every missing tool and its package.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        // sh is always present on the hosts this builds on
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely-not-a-real-command-xyz123"));
    }

    #[test]
    fn test_check_required_tools_lists_every_missing_tool() {
        let tools = &[
            ("sh", "dash"),
            ("definitely-not-a-real-command-xyz123", "fake-package"),
            ("another-missing-tool-xyz789", "other-package"),
        ];
        let msg = check_required_tools(tools).unwrap_err().to_string();
        assert!(msg.contains("definitely-not-a-real-command-xyz123 (install: fake-package)"));
        assert!(msg.contains("another-missing-tool-xyz789 (install: other-package)"));
        assert!(!msg.contains("dash"));
    }

    #[test]
    fn test_check_required_tools_passes_when_present() {
        assert!(check_required_tools(&[("sh", "dash")]).is_ok());
    }

    #[test]
    fn test_rebuild_tools_follow_profile() {
        let mut profile = BuildProfile::builtin().unwrap();
        assert_eq!(rebuild_tools(&profile), vec![("docker", "docker.io")]);

        profile.container.engine = "podman".to_string();
        profile.container.builder = BuilderSource::CargoTarget("x86_64-unknown-linux-musl".to_string());
        assert_eq!(
            rebuild_tools(&profile),
            vec![("podman", "podman"), ("cargo", "cargo")]
        );
    }
}
