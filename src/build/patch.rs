//! Ordered patch application.
//!
//! Patches are applied strictly in sequence with `patch -p1`. Later patches
//! are written against the tree as left by the earlier ones, so the first
//! failure stops the run and nothing after it is attempted.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{BuildError, Result, Stage};
use crate::process::{Cmd, ProcessRunner};

/// Ordered sequence of patch files. Order is application order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSet {
    patches: Vec<PathBuf>,
}

impl PatchSet {
    pub fn new(patches: Vec<PathBuf>) -> Self {
        Self { patches }
    }

    /// Regular files in `dir` with the given extension, sorted by file name.
    pub fn discover(dir: &Path, extension: &str) -> Result<Self> {
        let read_err = |e: io::Error| BuildError::io(Stage::Patch, "listing patches in", dir, e);
        let mut patches = Vec::new();
        for entry in fs::read_dir(dir).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            let path = entry.path();
            if !entry.file_type().map_err(read_err)?.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) == Some(extension) {
                patches.push(path);
            }
        }
        patches.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(Self { patches })
    }

    /// Named patches resolved under `dir`, in the given order. Only the
    /// file name of each entry is used. A listed patch that is not there is
    /// an error, never skipped.
    pub fn from_names(dir: &Path, names: &[String]) -> Result<Self> {
        let mut patches = Vec::with_capacity(names.len());
        for name in names {
            let file_name = Path::new(name).file_name().unwrap_or(OsStr::new(name));
            let path = dir.join(file_name);
            if !path.is_file() {
                return Err(BuildError::io(
                    Stage::Patch,
                    "locating",
                    &path,
                    io::Error::new(io::ErrorKind::NotFound, "listed patch is not in the work directory"),
                ));
            }
            patches.push(path);
        }
        Ok(Self { patches })
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.patches.iter().map(PathBuf::as_path)
    }
}

/// Apply every patch in order against `source_tree`.
pub fn apply_patches(
    runner: &dyn ProcessRunner,
    source_tree: &Path,
    patches: &PatchSet,
) -> Result<()> {
    if patches.is_empty() {
        info!(stage = "patch", "no patches to apply");
        return Ok(());
    }

    for patch in patches.iter() {
        info!(stage = "patch", patch = %patch.display(), "applying patch");
        apply_one(runner, source_tree, patch)?;
    }
    Ok(())
}

fn apply_one(runner: &dyn ProcessRunner, source_tree: &Path, patch: &Path) -> Result<()> {
    let patch_err = |reason: String| BuildError::Patch {
        patch: patch.to_path_buf(),
        reason,
    };

    // Opening is checked here so an unreadable patch is not reported as a
    // missing patch tool.
    fs::File::open(patch).map_err(|e| BuildError::io(Stage::Patch, "opening", patch, e))?;

    let cmd = Cmd::new("patch")
        .arg("-p1")
        .current_dir(source_tree)
        .stdin_file(patch)
        .error_msg("patch -p1");
    let outcome = runner.run(&cmd).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => patch_err("patch not found on PATH".to_string()),
        _ => patch_err(format!("running '{}': {}", cmd.command_line(), e)),
    })?;
    if !outcome.success() {
        return Err(patch_err(cmd.failure_reason(&outcome)));
    }
    Ok(())
}
