//! The kernel build pipeline.
//!
//! - [`fetch`] - download the pinned release archive
//! - [`unpack`] - expand it with `tar`
//! - [`patch`] - apply the patch set in order
//! - [`kernel`] - compose `.config` and compile the boot image
//!
//! [`Pipeline::run`] chains them and stops at the first error. The failing
//! stage is available from [`BuildError::stage`].

pub mod fetch;
pub mod kernel;
pub mod patch;
pub mod unpack;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::artifact::{copy_artifact, ArtifactInfo};
use crate::error::{BuildError, Result, Stage};
use crate::process::ProcessRunner;
use crate::profile::BuildProfile;

use fetch::SourceFetcher;
use patch::PatchSet;

/// Pipeline stages in execution order.
pub const PIPELINE_STAGES: [Stage; 6] = [
    Stage::Fetch,
    Stage::Unpack,
    Stage::Patch,
    Stage::Configure,
    Stage::Compile,
    Stage::Extract,
];

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub archive: PathBuf,
    pub source_tree: PathBuf,
    pub patches: PatchSet,
    pub artifact: ArtifactInfo,
}

/// One single-shot kernel build inside a working directory.
pub struct Pipeline<'a> {
    profile: &'a BuildProfile,
    runner: &'a dyn ProcessRunner,
    fetcher: &'a dyn SourceFetcher,
    work_dir: PathBuf,
    output_path: PathBuf,
    jobs: usize,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        profile: &'a BuildProfile,
        runner: &'a dyn ProcessRunner,
        fetcher: &'a dyn SourceFetcher,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            profile,
            runner,
            fetcher,
            work_dir: work_dir.into(),
            output_path: profile.output_path.clone(),
            jobs: kernel::parallelism(),
        }
    }

    /// Write the artifact somewhere other than the profile's output path.
    pub fn with_output_path(mut self, output_path: impl Into<PathBuf>) -> Self {
        self.output_path = output_path.into();
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// The profile's patch list when it has one, in list order. Otherwise
    /// every patch file in the work directory, sorted by name.
    fn patch_set(&self) -> Result<PatchSet> {
        if self.profile.patches.is_empty() {
            PatchSet::discover(&self.work_dir, &self.profile.patch_extension)
        } else {
            PatchSet::from_names(&self.work_dir, &self.profile.patches)
        }
    }

    pub fn run(&self) -> Result<PipelineReport> {
        let release = &self.profile.release;
        let patches = self.patch_set()?;
        info!(
            profile = %self.profile.name,
            release = %release,
            patches = patches.len(),
            work_dir = %self.work_dir.display(),
            "starting kernel build"
        );

        info!(stage = "fetch", url = %release.url(), "downloading kernel source");
        let archive = self.work_dir.join(release.archive_name());
        self.fetcher.fetch(release, &archive)?;

        let source_tree = unpack::unpack_archive(self.runner, &archive, &self.work_dir, release)?;

        patch::apply_patches(self.runner, &source_tree, &patches)?;

        kernel::compose_config(self.runner, &source_tree, self.profile)?;

        let image = kernel::compile_kernel(self.runner, &source_tree, self.profile, self.jobs)?;

        if let Some(parent) = self.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| BuildError::io(Stage::Extract, "creating", parent, e))?;
        }
        let artifact = copy_artifact(&self.output_path, &image, Stage::Extract)?;

        info!(artifact = %artifact.path.display(), "kernel build complete");
        Ok(PipelineReport {
            archive,
            source_tree,
            patches,
            artifact,
        })
    }
}
