//! Archive expansion via the host's `tar`.

use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{BuildError, Result};
use crate::process::{Cmd, ProcessRunner};
use crate::release::ReleaseDescriptor;

/// Unpack `archive` inside `work_dir` and return the source tree root.
///
/// Running this twice over the same directory is not guarded against.
pub fn unpack_archive(
    runner: &dyn ProcessRunner,
    archive: &Path,
    work_dir: &Path,
    release: &ReleaseDescriptor,
) -> Result<PathBuf> {
    let extract_err = |reason: String| BuildError::Extract {
        archive: archive.to_path_buf(),
        reason,
    };

    info!(stage = "unpack", archive = %archive.display(), "unpacking kernel source");
    let cmd = Cmd::new("tar")
        .arg("xf")
        .arg_path(archive)
        .current_dir(work_dir)
        .error_msg("tar xf");
    let outcome = runner.run(&cmd).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => extract_err("tar not found on PATH".to_string()),
        _ => extract_err(format!("running '{}': {}", cmd.command_line(), e)),
    })?;
    if !outcome.success() {
        return Err(extract_err(cmd.failure_reason(&outcome)));
    }

    let source_tree = work_dir.join(release.source_dir_name());
    if !source_tree.is_dir() {
        return Err(extract_err(format!(
            "archive did not contain the expected directory '{}'",
            release.source_dir_name()
        )));
    }
    Ok(source_tree)
}
