//! Core traits and types for driving an external camera-control tool.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A typed invocation of an external program.
///
/// Arguments are passed to the program as-is; no shell is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to launch.
    pub program: PathBuf,
    /// Arguments, in order.
    pub args: Vec<OsString>,
    /// Working directory, if different from the current one.
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Create a command for `program` with no arguments.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the command from `dir`.
    #[must_use]
    pub fn current_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Whether `flag` appears among the arguments.
    pub fn has_arg(&self, flag: &str) -> bool {
        self.args.iter().any(|arg| arg == flag)
    }

    /// The argument following the first occurrence of `flag`, if any.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .skip_while(|arg| *arg != flag)
            .nth(1)
            .and_then(|value| value.to_str())
    }

    /// File name of the program, used in log lines and error messages.
    pub fn program_name(&self) -> String {
        let Some(name) = self.program.file_name() else {
            return self.program.display().to_string();
        };
        name.to_string_lossy().into_owned()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured output of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Program name, kept for error reporting.
    pub program: String,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit status; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
}

impl CommandResult {
    /// Whether the command exited with status zero.
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into [`CaptureError::CommandFailed`].
    pub fn check(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(CaptureError::CommandFailed {
                program: self.program,
                code: self.exit_code,
                stderr: self.stderr.trim().to_owned(),
            })
        }
    }
}

/// Why a capture could not be confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationFailure {
    /// A file the capture should have downloaded is not on disk.
    MissingFile {
        /// The missing path.
        path: PathBuf,
    },
    /// The camera's image count did not grow by the number of exposures.
    CountMismatch {
        /// Number of exposures requested.
        expected: usize,
        /// Observed change in the camera's image count.
        actual: i64,
    },
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFile { path } => {
                write!(f, "expected file {} was not created", path.display())
            }
            Self::CountMismatch { expected, actual } => {
                write!(f, "image count changed by {actual}, expected {expected}")
            }
        }
    }
}

/// Error type for capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The camera could not be reached.
    #[error("error talking to the camera: {stderr}")]
    DeviceCommunication {
        /// Error text reported by the control tool.
        stderr: String,
    },
    /// The camera is not set up the way the session requires.
    #[error("camera configuration: {0}")]
    Configuration(String),
    /// Requested exposures were not produced.
    #[error("capture verification failed: {0}")]
    Verification(VerificationFailure),
    /// A command exited with a failure status for an unclassified reason.
    #[error("`{program}` exited with status {code}: {stderr}")]
    CommandFailed {
        /// Program name.
        program: String,
        /// Exit status.
        code: i32,
        /// Error text.
        stderr: String,
    },
    /// The external program could not be launched.
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying launch error.
        #[source]
        source: std::io::Error,
    },
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Whether a reset followed by another attempt may clear this error.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DeviceCommunication { .. } | Self::Verification(_)
        )
    }

    /// Shorthand for a missing-file verification failure.
    pub fn missing_file(path: &Path) -> Self {
        Self::Verification(VerificationFailure::MissingFile {
            path: path.to_path_buf(),
        })
    }
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Abstraction over running external control commands.
pub trait CommandRunner {
    /// Run `command` to completion and capture its output.
    ///
    /// Fails with [`CaptureError::DeviceCommunication`] when the command
    /// reports that no camera was found. Any other failing exit is returned
    /// as a [`CommandResult`] for the caller to judge.
    fn run(&self, command: &CommandSpec) -> Result<CommandResult>;

    /// Whether commands are actually executed. A rehearsal runner returns
    /// `false`, and callers skip checks that need real device output.
    fn executes(&self) -> bool {
        true
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, command: &CommandSpec) -> Result<CommandResult> {
        (**self).run(command)
    }

    fn executes(&self) -> bool {
        (**self).executes()
    }
}

/// Source of wall-clock time and blocking sleep.
pub trait Clock {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Answers whether there is enough ambient light to shoot.
pub trait DaylightOracle {
    /// Whether it is light out at `at`.
    fn is_light(&self, at: DateTime<Utc>) -> bool;
}

impl<F> DaylightOracle for F
where
    F: Fn(DateTime<Utc>) -> bool,
{
    fn is_light(&self, at: DateTime<Utc>) -> bool {
        self(at)
    }
}
