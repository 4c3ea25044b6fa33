//! Process-backed command runner.

use std::process::Command;

use tracing::{debug, Span};

use crate::traits::{CaptureError, CommandResult, CommandRunner, CommandSpec, Result};

/// Marker the control tool prints when no camera is attached.
pub const NO_CAMERA_MARKER: &str = "No camera found";

/// How a failing command is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The camera is unreachable; worth a reset and another attempt.
    DeviceCommunication,
    /// Any other failure; surfaced to the caller as-is.
    Opaque,
}

/// Classify a finished command, or `None` when it succeeded.
pub fn classify(result: &CommandResult) -> Option<Failure> {
    if result.success() {
        return None;
    }
    let no_camera = result.stderr.contains(NO_CAMERA_MARKER);
    if no_camera || result.stdout.contains(NO_CAMERA_MARKER) {
        Some(Failure::DeviceCommunication)
    } else {
        Some(Failure::Opaque)
    }
}

/// Apply the runner contract to a finished command: camera-not-found
/// failures become [`CaptureError::DeviceCommunication`], everything else is
/// handed back.
pub fn into_outcome(result: CommandResult) -> Result<CommandResult> {
    match classify(&result) {
        Some(Failure::DeviceCommunication) => Err(CaptureError::DeviceCommunication {
            stderr: result.stderr.trim().to_owned(),
        }),
        _ => Ok(result),
    }
}

/// Runs commands as child processes and waits for them to finish.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    execute: bool,
    span: Span,
}

impl ProcessRunner {
    /// Create a runner. When `execute` is false no process is launched and
    /// every command returns an empty, successful result.
    pub const fn new(execute: bool, span: Span) -> Self {
        Self { execute, span }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, command: &CommandSpec) -> Result<CommandResult> {
        debug!(parent: &self.span, %command, "running");

        let program = command.program_name();
        if !self.execute {
            return Ok(CommandResult {
                program,
                ..CommandResult::default()
            });
        }

        let mut process = Command::new(&command.program);
        process.args(&command.args);
        if let Some(dir) = &command.current_dir {
            process.current_dir(dir);
        }

        let output = process.output().map_err(|source| CaptureError::Spawn {
            program: program.clone(),
            source,
        })?;

        let result = CommandResult {
            program,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        };

        if classify(&result) == Some(Failure::Opaque) {
            debug!(
                parent: &self.span,
                program = %result.program,
                code = result.exit_code,
                "command failed"
            );
        }
        into_outcome(result)
    }

    fn executes(&self) -> bool {
        self.execute
    }
}
