//! Reproducible kernel builds for router7.
//!
//! Two halves share this crate:
//!
//! - **Pipeline** ([`build`]) - fetch a pinned kernel release, unpack it,
//!   apply patches, compose the config and compile the boot image with a
//!   fixed build identity.
//! - **Rebuild** ([`container`]) - run the pipeline inside a throwaway
//!   container on a developer host and copy the image back.
//!
//! # Architecture
//!
//! ```text
//! router-kernel rebuild (host)
//!     │
//!     ├── stages builder + patches + profile + Dockerfile in /tmp
//!     ├── <engine> build, <engine> run --volume <tmp>:/tmp/buildresult
//!     └── copies /tmp/.../vmlinuz to the destination
//!
//! router-kernel build (container)
//!     │
//!     └── fetch → unpack → patch → configure → compile → extract
//! ```
//!
//! Everything a run needs is described by a [`BuildProfile`]. The router7
//! profile is compiled in.
//!
//! # Example
//!
//! ```rust,ignore
//! use router_kernel::build::fetch::HttpFetcher;
//! use router_kernel::{BuildProfile, Pipeline, SystemRunner};
//!
//! let profile = BuildProfile::builtin()?;
//! let fetcher = HttpFetcher::new()?;
//! let report = Pipeline::new(&profile, &SystemRunner, &fetcher, "/usr/src").run()?;
//! println!("{}", report.artifact.sha256);
//! ```

pub mod artifact;
pub mod build;
pub mod container;
pub mod error;
pub mod preflight;
pub mod process;
pub mod profile;
pub mod release;

pub use build::{Pipeline, PipelineReport};
pub use container::{Rebuild, RebuildReport, RebuildState};
pub use error::{BuildError, Stage};
pub use process::{Cmd, ProcessRunner, SystemRunner};
pub use profile::BuildProfile;
pub use release::ReleaseDescriptor;
