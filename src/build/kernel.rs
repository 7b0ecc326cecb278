//! Kernel configuration and compilation.
//!
//! Configuration is composed in three steps, in this order:
//!
//! 1. `make defconfig` generates a complete baseline `.config`.
//! 2. The profile's addendum is appended to it byte for byte.
//! 3. `make olddefconfig` resolves the combined file, pulling in
//!    prerequisites of newly enabled options and dropping orphaned ones.
//!
//! Appending after step 3 would leave the addendum unresolved; generating
//! after step 2 would throw it away.
//!
//! Compilation runs with a fixed kbuild identity so identical inputs give
//! identical images no matter which machine or clock built them.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{BuildError, Result, Stage};
use crate::process::{Cmd, ProcessRunner};
use crate::profile::BuildProfile;

/// Path of the kernel config inside a source tree.
pub fn config_path(source_tree: &Path) -> PathBuf {
    source_tree.join(".config")
}

/// Generate, extend and reconcile `.config`. Returns its path.
pub fn compose_config(
    runner: &dyn ProcessRunner,
    source_tree: &Path,
    profile: &BuildProfile,
) -> Result<PathBuf> {
    info!(stage = "configure", make_target = %profile.defconfig_target, "generating base config");
    run_config_target(runner, source_tree, &profile.defconfig_target)?;

    info!(
        stage = "configure",
        bytes = profile.addendum.len(),
        "appending config addendum"
    );
    append_addendum(source_tree, profile.addendum.as_bytes())?;

    info!(stage = "configure", make_target = %profile.reconcile_target, "resolving config dependencies");
    run_config_target(runner, source_tree, &profile.reconcile_target)?;

    Ok(config_path(source_tree))
}

/// Run one make target that rewrites `.config`.
pub fn run_config_target(runner: &dyn ProcessRunner, source_tree: &Path, target: &str) -> Result<()> {
    let cmd = Cmd::new("make").arg(target).current_dir(source_tree);
    let config_err = |reason: String| BuildError::Config {
        step: format!("make {}", target),
        reason,
    };
    let outcome = runner.run(&cmd).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => config_err("make not found on PATH".to_string()),
        _ => config_err(e.to_string()),
    })?;
    if !outcome.success() {
        return Err(config_err(outcome.describe()));
    }
    Ok(())
}

/// Append raw addendum bytes to an existing `.config`. No parsing and no
/// de-duplication: the reconcile step decides between repeated keys.
pub fn append_addendum(source_tree: &Path, addendum: &[u8]) -> Result<()> {
    let path = config_path(source_tree);
    let mut config = OpenOptions::new()
        .append(true)
        .open(&path)
        .map_err(|e| BuildError::io(Stage::Configure, "opening", &path, e))?;
    config
        .write_all(addendum)
        .map_err(|e| BuildError::io(Stage::Configure, "appending to", &path, e))?;
    config
        .flush()
        .map_err(|e| BuildError::io(Stage::Configure, "flushing", &path, e))?;
    Ok(())
}

/// Number of parallel make jobs.
pub fn parallelism() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) => n.get(),
        Err(e) => {
            warn!("could not detect CPU count ({}), using 4 jobs", e);
            4
        }
    }
}

/// Build the boot image and return its path inside the source tree.
///
/// Partial output is left in place on failure.
pub fn compile_kernel(
    runner: &dyn ProcessRunner,
    source_tree: &Path,
    profile: &BuildProfile,
    jobs: usize,
) -> Result<PathBuf> {
    let mut cmd = Cmd::new("make")
        .arg(&profile.image_target)
        .arg(format!("-j{}", jobs.max(1)))
        .current_dir(source_tree);
    for (key, value) in profile.identity.env_pairs() {
        cmd = cmd.env(key, value);
    }
    let command = cmd.command_line();

    info!(stage = "compile", %command, "compiling kernel");
    let compile_err = |reason: String| BuildError::Compile {
        command: command.clone(),
        reason,
    };
    let outcome = runner.run(&cmd).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => compile_err("make not found on PATH".to_string()),
        _ => compile_err(e.to_string()),
    })?;
    if !outcome.success() {
        return Err(compile_err(outcome.describe()));
    }

    let image = source_tree.join(&profile.image_path);
    if !image.is_file() {
        return Err(compile_err(format!(
            "build succeeded but produced no image at {}",
            image.display()
        )));
    }
    Ok(image)
}
