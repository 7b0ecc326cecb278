//! The one directory shared between host and container.
//!
//! The container writes the artifact into it and exits; only then does the
//! host read it back, exactly once. [`OutputMount`] is that read: it is
//! created after the container has exited and consumed by the retrieval.

use std::path::{Path, PathBuf};

use crate::artifact::{copy_artifact, ArtifactInfo};
use crate::error::{Result, Stage};

/// `host:container` argument for the engine's `--volume` flag.
pub fn volume_arg(host_dir: &Path, container_dir: &str) -> String {
    format!("{}:{}", host_dir.display(), container_dir)
}

#[derive(Debug)]
pub struct OutputMount {
    host_dir: PathBuf,
    artifact_name: String,
}

impl OutputMount {
    pub fn new(host_dir: &Path, artifact_name: &str) -> Self {
        Self {
            host_dir: host_dir.to_path_buf(),
            artifact_name: artifact_name.to_string(),
        }
    }

    /// Where the container left the artifact.
    pub fn artifact_path(&self) -> PathBuf {
        self.host_dir.join(&self.artifact_name)
    }

    /// Copy the artifact to `dest`, consuming the mount.
    pub fn retrieve(self, dest: &Path) -> Result<ArtifactInfo> {
        copy_artifact(dest, &self.artifact_path(), Stage::RetrieveArtifact)
    }
}
