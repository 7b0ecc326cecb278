//! Error taxonomy for the build pipeline and the rebuild orchestrator.
//!
//! Every variant is fatal to the run. The message always names the stage's
//! file or command so the operator knows where to look.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Pipeline and orchestrator stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Fetch,
    Unpack,
    Patch,
    Configure,
    Compile,
    Extract,
    StageContext,
    BuildImage,
    RunContainer,
    RetrieveArtifact,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Unpack => "unpack",
            Stage::Patch => "patch",
            Stage::Configure => "configure",
            Stage::Compile => "compile",
            Stage::Extract => "extract",
            Stage::StageContext => "stage-context",
            Stage::BuildImage => "build-image",
            Stage::RunContainer => "run-container",
            Stage::RetrieveArtifact => "retrieve-artifact",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("fetching {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    #[error("unpacking {} failed: {reason}", archive.display())]
    Extract { archive: PathBuf, reason: String },

    #[error("applying patch {} failed: {reason}", patch.display())]
    Patch { patch: PathBuf, reason: String },

    #[error("configuration step '{step}' failed: {reason}")]
    Config { step: String, reason: String },

    #[error("kernel compilation ('{command}') failed: {reason}")]
    Compile { command: String, reason: String },

    #[error("I/O error during {stage}: {action} {}: {source}", path.display())]
    Io {
        stage: Stage,
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("container image build ('{command}') failed: {reason}")]
    ContainerBuild { command: String, reason: String },

    #[error("container run ('{command}') failed: {reason}")]
    ContainerRun { command: String, reason: String },
}

impl BuildError {
    /// Wrap an I/O failure with the stage, verb and path it happened on.
    pub fn io(stage: Stage, action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        BuildError::Io {
            stage,
            action,
            path: path.into(),
            source,
        }
    }

    /// The stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            BuildError::Fetch { .. } => Stage::Fetch,
            BuildError::Extract { .. } => Stage::Unpack,
            BuildError::Patch { .. } => Stage::Patch,
            BuildError::Config { .. } => Stage::Configure,
            BuildError::Compile { .. } => Stage::Compile,
            BuildError::Io { stage, .. } => *stage,
            BuildError::ContainerBuild { .. } => Stage::BuildImage,
            BuildError::ContainerRun { .. } => Stage::RunContainer,
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
