use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use router_kernel::build::fetch::HttpFetcher;
use router_kernel::preflight::{check_required_tools, rebuild_tools, PIPELINE_TOOLS};
use router_kernel::{BuildError, BuildProfile, Pipeline, Rebuild, SystemRunner};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn usage() -> &'static str {
    "Usage:\n  router-kernel build [--profile <path>] [--work-dir <dir>] [--output <path>]\n  router-kernel rebuild [--profile <path>] [--dest <path>]\n  router-kernel recipe [--profile <path>]\n  router-kernel profile [--profile <path>]"
}

#[derive(Default)]
struct Options {
    profile: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    output: Option<PathBuf>,
    dest: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<BuildError>() {
                Some(build_err) => error!(stage = %build_err.stage(), "{:#}", e),
                None => error!("{:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    match args.as_slice() {
        [cmd, rest @ ..] if cmd == "build" => {
            let opts = parse_options(rest, &["--profile", "--work-dir", "--output"])?;
            build(&opts)
        }
        [cmd, rest @ ..] if cmd == "rebuild" => {
            let opts = parse_options(rest, &["--profile", "--dest"])?;
            rebuild(&opts)
        }
        [cmd, rest @ ..] if cmd == "recipe" => {
            let opts = parse_options(rest, &["--profile"])?;
            let profile = load_profile(opts.profile.as_deref())?;
            print!("{}", Rebuild::new(&profile, &SystemRunner).recipe());
            Ok(())
        }
        [cmd, rest @ ..] if cmd == "profile" => {
            let opts = parse_options(rest, &["--profile"])?;
            let profile = load_profile(opts.profile.as_deref())?;
            print!("{}", profile.to_toml_string()?);
            Ok(())
        }
        _ => bail!(usage()),
    }
}

fn parse_options(args: &[String], allowed: &[&str]) -> Result<Options> {
    let mut opts = Options::default();
    let mut rest = args;
    while let [flag, value, tail @ ..] = rest {
        if !allowed.contains(&flag.as_str()) {
            bail!("unknown option '{}'\n{}", flag, usage());
        }
        let value = PathBuf::from(value);
        match flag.as_str() {
            "--profile" => opts.profile = Some(value),
            "--work-dir" => opts.work_dir = Some(value),
            "--output" => opts.output = Some(value),
            "--dest" => opts.dest = Some(value),
            _ => bail!("unknown option '{}'\n{}", flag, usage()),
        }
        rest = tail;
    }
    if let [dangling] = rest {
        bail!("option '{}' needs a value\n{}", dangling, usage());
    }
    Ok(opts)
}

fn load_profile(path: Option<&Path>) -> Result<BuildProfile> {
    match path {
        Some(path) => BuildProfile::load(path),
        None => BuildProfile::builtin(),
    }
}

fn build(opts: &Options) -> Result<()> {
    let profile = load_profile(opts.profile.as_deref())?;
    check_required_tools(PIPELINE_TOOLS)?;

    let work_dir = match &opts.work_dir {
        Some(dir) => dir.clone(),
        None => env::current_dir().context("determining working directory")?,
    };
    let fetcher = HttpFetcher::new()?;
    let mut pipeline = Pipeline::new(&profile, &SystemRunner, &fetcher, work_dir);
    if let Some(output) = &opts.output {
        pipeline = pipeline.with_output_path(output);
    }

    let report = pipeline.run()?;
    info!(
        artifact = %report.artifact.path.display(),
        sha256 = %report.artifact.sha256,
        "done"
    );
    Ok(())
}

fn rebuild(opts: &Options) -> Result<()> {
    let profile = load_profile(opts.profile.as_deref())?;
    check_required_tools(&rebuild_tools(&profile))?;

    let mut rebuild = Rebuild::new(&profile, &SystemRunner);
    if let Some(dest) = &opts.dest {
        rebuild = rebuild.with_destination(dest);
    }

    let report = rebuild.run()?;
    info!(
        destination = %report.artifact.path.display(),
        sha256 = %report.artifact.sha256,
        "rebuild complete"
    );
    Ok(())
}
