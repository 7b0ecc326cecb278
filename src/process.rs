//! External process invocation.
//!
//! Stages describe the command they need as a [`Cmd`] and hand it to a
//! [`ProcessRunner`]. Production code uses [`SystemRunner`]; tests swap in a
//! scripted runner so no real `make` or `docker` is ever spawned.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

/// Description of one external command.
#[derive(Debug, Clone, Default)]
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
    dir: Option<PathBuf>,
    stdin: Option<PathBuf>,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    /// Set an environment variable for the child, overriding the inherited value.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.envs.retain(|(k, _)| *k != key);
        self.envs.push((key, value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Feed the contents of `path` to the child's standard input.
    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Message prefixed to the failure reason when the command exits non-zero.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    pub fn get_envs(&self) -> &[(String, String)] {
        &self.envs
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn get_stdin_file(&self) -> Option<&Path> {
        self.stdin.as_deref()
    }

    /// The command line as the operator would type it.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.get_args())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Human-readable reason for a failed outcome.
    pub fn failure_reason(&self, outcome: &CmdOutcome) -> String {
        match &self.error_msg {
            Some(msg) => format!("{}: {}", msg, outcome.describe()),
            None => outcome.describe(),
        }
    }
}

/// Exit information of a finished command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdOutcome {
    /// Exit code, `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl CmdOutcome {
    pub fn exited(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn describe(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs commands to completion, blocking until the child exits.
pub trait ProcessRunner {
    /// Run `cmd`. An `Err` means the process could not be started at all
    /// (missing executable, unreadable stdin file); a started process that
    /// exits non-zero is an `Ok` outcome with `success() == false`.
    fn run(&self, cmd: &Cmd) -> io::Result<CmdOutcome>;
}

/// Spawns real processes with inherited stdout/stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, cmd: &Cmd) -> io::Result<CmdOutcome> {
        debug!(command = %cmd.command_line(), dir = ?cmd.dir, "spawning");

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        for (key, value) in &cmd.envs {
            command.env(key, value);
        }
        if let Some(dir) = &cmd.dir {
            command.current_dir(dir);
        }
        match &cmd.stdin {
            Some(path) => {
                command.stdin(Stdio::from(File::open(path)?));
            }
            None => {
                command.stdin(Stdio::null());
            }
        }

        let status = command.status()?;
        Ok(CmdOutcome {
            code: status.code(),
        })
    }
}
