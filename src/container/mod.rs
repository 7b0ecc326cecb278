//! Containerized rebuild.
//!
//! Runs the kernel pipeline inside a throwaway container so the host only
//! needs a container engine:
//!
//! 1. stage a build context (builder executable, patches, profile, recipe)
//!    in a fresh temporary directory
//! 2. build the image from it
//! 3. run the image with the temporary directory mounted as the output dir
//! 4. copy the artifact the container left there to the destination
//!
//! The temporary directory is removed when the run ends, whether it
//! succeeded or not.

pub mod locate;
pub mod mount;
pub mod recipe;

use std::cell::Cell;
use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::unistd::{getgid, getuid};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::artifact::ArtifactInfo;
use crate::error::{BuildError, Result, Stage};
use crate::process::{Cmd, ProcessRunner};
use crate::profile::{BuilderSource, BuildProfile};

use locate::FileLocator;
use mount::{volume_arg, OutputMount};
use recipe::{RecipeParams, STAGED_PROFILE};

/// File name of the builder executable inside the build context and image.
pub const BUILDER_NAME: &str = "router-kernel";

const CONTEXT_PREFIX: &str = "router-kernel-rebuild";

/// Staging happens under `/tmp` whatever `$TMPDIR` says: some container
/// engines only bind-mount paths below a fixed set of host directories.
const STAGING_ROOT: &str = "/tmp";

/// Orchestrator progress. Moves strictly forward; a failure leaves the
/// orchestrator in the state that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RebuildState {
    Init,
    StageContext,
    BuildImage,
    RunContainer,
    RetrieveArtifact,
    Done,
}

impl fmt::Display for RebuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RebuildState::Init => "init",
            RebuildState::StageContext => "stage-context",
            RebuildState::BuildImage => "build-image",
            RebuildState::RunContainer => "run-container",
            RebuildState::RetrieveArtifact => "retrieve-artifact",
            RebuildState::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct RebuildReport {
    /// The staging directory. Already removed when the report is returned.
    pub context_dir: PathBuf,
    /// Host paths of the patches that were staged, in application order.
    pub patches: Vec<PathBuf>,
    pub artifact: ArtifactInfo,
}

pub struct Rebuild<'a> {
    profile: &'a BuildProfile,
    runner: &'a dyn ProcessRunner,
    locator: FileLocator,
    destination: Option<PathBuf>,
    temp_root: PathBuf,
    uid: u32,
    gid: u32,
    state: Cell<RebuildState>,
}

impl<'a> Rebuild<'a> {
    pub fn new(profile: &'a BuildProfile, runner: &'a dyn ProcessRunner) -> Self {
        let (uid, gid) = current_user();
        Self {
            profile,
            runner,
            locator: FileLocator::default(),
            destination: None,
            temp_root: PathBuf::from(STAGING_ROOT),
            uid,
            gid,
            state: Cell::new(RebuildState::Init),
        }
    }

    pub fn with_locator(mut self, locator: FileLocator) -> Self {
        self.locator = locator;
        self
    }

    /// Copy the artifact here instead of to the located artifact file.
    pub fn with_destination(mut self, dest: impl Into<PathBuf>) -> Self {
        self.destination = Some(dest.into());
        self
    }

    /// Directory the staging directory is created in.
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = root.into();
        self
    }

    pub fn with_user(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn state(&self) -> RebuildState {
        self.state.get()
    }

    pub fn run(&self) -> Result<RebuildReport> {
        let profile = self.profile;

        // Resolve every host input before touching the engine.
        let mut patches = Vec::with_capacity(profile.patches.len());
        for name in &profile.patches {
            let path = self
                .locator
                .find(name)
                .map_err(|e| BuildError::io(Stage::StageContext, "locating", name, e))?;
            patches.push(path);
        }
        let destination = match &self.destination {
            Some(dest) => dest.clone(),
            None => self
                .locator
                .find(profile.artifact_name())
                .map_err(|e| BuildError::io(Stage::StageContext, "locating", profile.artifact_name(), e))?,
        };

        self.enter(RebuildState::StageContext);
        let context = tempfile::Builder::new()
            .prefix(CONTEXT_PREFIX)
            .tempdir_in(&self.temp_root)
            .map_err(|e| BuildError::io(Stage::StageContext, "creating staging directory in", &self.temp_root, e))?;
        let context_dir = context.path().to_path_buf();
        self.stage_context(&context, &patches)?;

        self.enter(RebuildState::BuildImage);
        self.build_image(&context_dir)?;

        self.enter(RebuildState::RunContainer);
        self.run_container(&context_dir)?;

        self.enter(RebuildState::RetrieveArtifact);
        let mount = OutputMount::new(&context_dir, profile.artifact_name());
        let artifact = mount.retrieve(&destination)?;

        context
            .close()
            .map_err(|e| BuildError::io(Stage::RetrieveArtifact, "removing", &context_dir, e))?;
        self.enter(RebuildState::Done);

        Ok(RebuildReport {
            context_dir,
            patches,
            artifact,
        })
    }

    /// Render the recipe this rebuild would use.
    pub fn recipe(&self) -> String {
        self.recipe_params().render()
    }

    fn recipe_params(&self) -> RecipeParams {
        let container = &self.profile.container;
        RecipeParams {
            base_image: container.base_image.clone(),
            packages: container.packages.clone(),
            builder: BUILDER_NAME.to_string(),
            patches: self.profile.patches.iter().map(|p| basename(p)).collect(),
            uid: self.uid,
            gid: self.gid,
        }
    }

    fn enter(&self, next: RebuildState) {
        debug!(from = %self.state.get(), to = %next, "rebuild state change");
        self.state.set(next);
        info!(stage = %next, profile = %self.profile.name, "rebuild");
    }

    fn stage_context(&self, context: &TempDir, patches: &[PathBuf]) -> Result<()> {
        let dir = context.path();

        let builder = self.builder_executable()?;
        copy_into(&builder, &dir.join(BUILDER_NAME))?;

        for patch in patches {
            let name = basename(&patch.to_string_lossy());
            copy_into(patch, &dir.join(name))?;
        }

        let profile_path = dir.join(STAGED_PROFILE);
        let rendered = self.profile.to_toml_string().map_err(|e| {
            BuildError::io(
                Stage::StageContext,
                "rendering",
                &profile_path,
                io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
            )
        })?;
        fs::write(&profile_path, rendered)
            .map_err(|e| BuildError::io(Stage::StageContext, "writing", &profile_path, e))?;

        let recipe_path = dir.join("Dockerfile");
        fs::write(&recipe_path, self.recipe())
            .map_err(|e| BuildError::io(Stage::StageContext, "writing", &recipe_path, e))?;

        info!(
            context = %dir.display(),
            patches = patches.len(),
            "build context staged"
        );
        Ok(())
    }

    fn builder_executable(&self) -> Result<PathBuf> {
        match &self.profile.container.builder {
            BuilderSource::CurrentExe => env::current_exe()
                .map_err(|e| BuildError::io(Stage::StageContext, "locating", "current executable", e)),
            BuilderSource::Prebuilt(path) => Ok(path.clone()),
            BuilderSource::CargoTarget(target) => self.cross_compile(target),
        }
    }

    fn cross_compile(&self, target: &str) -> Result<PathBuf> {
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        let cmd = Cmd::new("cargo")
            .args(["build", "--release", "--bin", BUILDER_NAME, "--target"])
            .arg(target)
            .current_dir(manifest_dir)
            .error_msg("cross-compiling builder");
        info!(triple = target, "cross-compiling builder executable");

        let outcome = self.runner.run(&cmd).map_err(|e| BuildError::ContainerBuild {
            command: cmd.command_line(),
            reason: e.to_string(),
        })?;
        if !outcome.success() {
            return Err(BuildError::ContainerBuild {
                command: cmd.command_line(),
                reason: cmd.failure_reason(&outcome),
            });
        }

        let target_dir = env::var_os("CARGO_TARGET_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| manifest_dir.join("target"));
        Ok(target_dir.join(target).join("release").join(BUILDER_NAME))
    }

    fn build_image(&self, context_dir: &Path) -> Result<()> {
        let container = &self.profile.container;
        let cmd = Cmd::new(&container.engine)
            .arg("build")
            .arg("--rm=true")
            .arg(format!("--tag={}", container.image_tag))
            .arg(".")
            .current_dir(context_dir);

        let outcome = self.runner.run(&cmd).map_err(|e| BuildError::ContainerBuild {
            command: cmd.command_line(),
            reason: spawn_reason(&container.engine, e),
        })?;
        if !outcome.success() {
            return Err(BuildError::ContainerBuild {
                command: cmd.command_line(),
                reason: outcome.describe(),
            });
        }
        Ok(())
    }

    fn run_container(&self, context_dir: &Path) -> Result<()> {
        let container = &self.profile.container;
        let cmd = Cmd::new(&container.engine)
            .arg("run")
            .arg("--rm")
            .arg("--volume")
            .arg(volume_arg(context_dir, &container.mount_point))
            .arg(&container.image_tag)
            .current_dir(context_dir);

        let outcome = self.runner.run(&cmd).map_err(|e| BuildError::ContainerRun {
            command: cmd.command_line(),
            reason: spawn_reason(&container.engine, e),
        })?;
        if !outcome.success() {
            return Err(BuildError::ContainerRun {
                command: cmd.command_line(),
                reason: outcome.describe(),
            });
        }
        Ok(())
    }
}

fn current_user() -> (u32, u32) {
    (getuid().as_raw(), getgid().as_raw())
}

fn basename(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

fn spawn_reason(engine: &str, err: io::Error) -> String {
    if err.kind() == io::ErrorKind::NotFound {
        format!("{} not found on PATH", engine)
    } else {
        err.to_string()
    }
}

fn copy_into(src: &Path, dest: &Path) -> Result<()> {
    fs::copy(src, dest)
        .map(|_| ())
        .map_err(|e| BuildError::io(Stage::StageContext, "copying", src, e))
}
