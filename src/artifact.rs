//! Build artifact copying.
//!
//! Used by the pipeline to pull the image out of the kernel tree and by the
//! orchestrator to pull it out of the container's output directory.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{BuildError, Result, Stage};

/// Description of a copied artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub size: u64,
    /// Permission bits, copied from the source file.
    pub mode: u32,
    pub sha256: String,
}

/// Copy `src` to `dest` byte for byte and give `dest` the permission bits of
/// `src`. Whatever was at `dest` before is overwritten.
pub fn copy_artifact(dest: &Path, src: &Path, stage: Stage) -> Result<ArtifactInfo> {
    let mut input = File::open(src).map_err(|e| BuildError::io(stage, "opening", src, e))?;
    let metadata = input
        .metadata()
        .map_err(|e| BuildError::io(stage, "inspecting", src, e))?;
    let mut output = File::create(dest).map_err(|e| BuildError::io(stage, "creating", dest, e))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    let mut size = 0u64;
    loop {
        let n = input
            .read(&mut buf)
            .map_err(|e| BuildError::io(stage, "reading", src, e))?;
        if n == 0 {
            break;
        }
        output
            .write_all(&buf[..n])
            .map_err(|e| BuildError::io(stage, "writing", dest, e))?;
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    let mode = metadata.permissions().mode() & 0o7777;
    output
        .set_permissions(fs::Permissions::from_mode(mode))
        .map_err(|e| BuildError::io(stage, "setting permissions on", dest, e))?;
    output
        .flush()
        .map_err(|e| BuildError::io(stage, "flushing", dest, e))?;

    let sha256 = format!("{:x}", hasher.finalize());
    info!(
        stage = %stage,
        from = %src.display(),
        to = %dest.display(),
        size,
        mode = %format!("{:o}", mode),
        %sha256,
        "artifact copied"
    );

    Ok(ArtifactInfo {
        path: dest.to_path_buf(),
        size,
        mode,
        sha256,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn assert_faithful_copy(content: &[u8], mode: u32) {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("bzImage");
        let dest = temp.path().join("vmlinuz");
        fs::write(&src, content).unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(mode)).unwrap();

        let info = copy_artifact(&dest, &src, Stage::Extract).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), content);
        let dest_mode = fs::metadata(&dest).unwrap().permissions().mode() & 0o7777;
        assert_eq!(dest_mode, mode);
        assert_eq!(info.mode, mode);
        assert_eq!(info.size, content.len() as u64);
        assert_eq!(info.sha256, format!("{:x}", Sha256::digest(content)));
    }

    #[test]
    fn test_copies_empty_file() {
        assert_faithful_copy(b"", 0o644);
    }

    #[test]
    fn test_copies_single_byte() {
        assert_faithful_copy(b"\x7f", 0o755);
    }

    #[test]
    fn test_copies_large_file() {
        let content: Vec<u8> = (0..(3 * 1024 * 1024 + 17))
            .map(|i: u32| (i.wrapping_mul(31) % 251) as u8)
            .collect();
        assert_faithful_copy(&content, 0o600);
    }

    #[test]
    fn test_overwrites_existing_destination() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("bzImage");
        let dest = temp.path().join("vmlinuz");
        fs::write(&src, b"new").unwrap();
        fs::write(&dest, b"much longer old contents").unwrap();
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o600)).unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o755)).unwrap();

        copy_artifact(&dest, &src, Stage::RetrieveArtifact).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"new");
        assert_eq!(fs::metadata(&dest).unwrap().permissions().mode() & 0o7777, 0o755);
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let temp = TempDir::new().unwrap();
        let err = copy_artifact(
            &temp.path().join("vmlinuz"),
            &temp.path().join("missing"),
            Stage::Extract,
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::Io { .. }));
        assert_eq!(err.stage(), Stage::Extract);
        assert!(!temp.path().join("vmlinuz").exists());
    }

    #[test]
    fn test_missing_destination_dir_is_io_error() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("bzImage");
        fs::write(&src, b"image").unwrap();
        let err = copy_artifact(&temp.path().join("no/such/dir/vmlinuz"), &src, Stage::Extract)
            .unwrap_err();
        assert!(matches!(err, BuildError::Io { action: "creating", .. }));
    }
}
