//! External process invocation behind a narrow, fakeable capability.
//!
//! Every mutating step of a resolution (checkout, merge, commit, push,
//! package-manager install) is a blocking call to an external program. The
//! orchestrator only ever talks to a [`CommandRunner`], so its control flow
//! can be exercised against a scripted runner in tests.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{error, info, warn};

/// How loudly a failing command should be reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorLevel {
    /// Failure is expected to be fatal for the caller.
    #[default]
    Error,
    /// Failure is tolerated; logged as a warning.
    Warning,
}

/// A single external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; the runner's default when `None`.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables layered over the inherited environment.
    pub env: Vec<(String, String)>,
    /// Short tag used in log lines.
    pub label: String,
    pub error_level: ErrorLevel,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let program = program.into();
        Self {
            label: program.clone(),
            program,
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
            error_level: ErrorLevel::Error,
        }
    }

    /// Shorthand for a `git` invocation.
    pub fn git<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new("git", args)
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn warn_on_failure(mut self) -> Self {
        self.error_level = ErrorLevel::Warning;
        self
    }

    /// The command line as a single display string.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Exit code, or -1 when terminated by a signal.
    pub fn exit_code(&self) -> i32 {
        self.status.unwrap_or(-1)
    }

    /// Non-empty trimmed stdout lines.
    pub fn lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Entries of NUL-terminated output such as `git diff -z`. Paths come
    /// back verbatim, without git's C-style quoting.
    pub fn nul_separated(&self) -> Vec<String> {
        self.stdout
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Capability to run an external command to completion.
///
/// An `Err` means the process could not be started at all; a process that
/// ran and exited non-zero is an `Ok` with an unsuccessful [`CommandOutput`].
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        (**self).run(spec)
    }
}

/// Runs commands as real child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    default_cwd: PathBuf,
}

impl ProcessRunner {
    pub fn new(default_cwd: impl AsRef<Path>) -> Self {
        Self {
            default_cwd: default_cwd.as_ref().to_path_buf(),
        }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        let cwd = spec.cwd.as_deref().unwrap_or(&self.default_cwd);
        info!(
            "[{}] $ {} (cwd: {})",
            spec.label,
            spec.display(),
            cwd.display()
        );

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let output = cmd.output()?;
        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !result.success() {
            log_failure(spec, &result);
        }
        Ok(result)
    }
}

fn log_failure(spec: &CommandSpec, output: &CommandOutput) {
    let exit_code = output.exit_code();
    let stdout = output.stdout.trim();
    let stderr = output.stderr.trim();
    match spec.error_level {
        ErrorLevel::Error => error!(
            exit_code,
            stdout, stderr, "[{}] command failed: {}", spec.label, spec.display()
        ),
        ErrorLevel::Warning => warn!(
            exit_code,
            stdout, stderr, "[{}] command failed: {}", spec.label, spec.display()
        ),
    }
}
