//! Confirming that requested exposures were actually produced.

use std::path::PathBuf;

use tracing::{debug, warn, Span};

use crate::plan::ShootPlan;
use crate::reset::DeviceReset;
use crate::traits::{CaptureError, CommandRunner, Result, VerificationFailure};

/// Evidence gathered from one capture attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Exposures were downloaded; these files should now exist.
    Downloaded {
        /// Paths the capture command was told to write.
        produced_files: Vec<PathBuf>,
    },
    /// Exposures stayed on the camera.
    OnCamera {
        /// Image count on the camera after the capture.
        after: u32,
    },
}

/// Count the files listed by `gphoto2 --list-files`.
pub fn count_listed_files(output: &str) -> u32 {
    let count = output
        .lines()
        .filter(|line| line.trim_start().starts_with('#'))
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Checks captures against the plan.
#[derive(Debug)]
pub struct CaptureVerifier<'a, R> {
    runner: &'a R,
    reset: DeviceReset<'a, R>,
    span: Span,
}

impl<'a, R: CommandRunner> CaptureVerifier<'a, R> {
    /// Create a verifier. Images are counted in the camera folder named by
    /// the reset protocol's camera config, or across all folders.
    pub const fn new(runner: &'a R, reset: DeviceReset<'a, R>, span: Span) -> Self {
        Self {
            runner,
            reset,
            span,
        }
    }

    /// Number of images currently stored on the camera.
    ///
    /// The camera's file listing is unreliable unless it was reset first, so
    /// every count begins with a reset.
    pub fn count_camera_images(&self) -> Result<u32> {
        self.reset.reset()?;

        let camera = self.reset.camera();
        let mut command = camera.gphoto2().arg("--list-files");
        if let Some(folder) = &camera.folder {
            command = command.arg("--folder").arg(folder);
        }
        let result = self.runner.run(&command)?.check()?;
        let count = count_listed_files(&result.stdout);
        debug!(parent: &self.span, count, "camera image count");
        Ok(count)
    }

    /// Confirm `outcome` holds exactly the exposures the plan asks for.
    ///
    /// `before` is the camera image count taken just before the capture; it
    /// is only consulted for on-camera captures.
    pub fn verify(&self, plan: &ShootPlan, before: u32, outcome: &CaptureOutcome) -> Result<()> {
        if !self.runner.executes() {
            warn!(parent: &self.span, "dry run: skipping capture verification");
            return Ok(());
        }

        match outcome {
            CaptureOutcome::Downloaded { produced_files } => {
                if let Some(missing) = produced_files.iter().find(|path| !path.exists()) {
                    return Err(CaptureError::missing_file(missing));
                }
                debug!(parent: &self.span, files = produced_files.len(), "downloads verified");
                Ok(())
            }
            CaptureOutcome::OnCamera { after } => {
                let delta = i64::from(*after) - i64::from(before);
                let expected = plan.exposures.len();
                if i64::try_from(expected).ok() != Some(delta) {
                    let failure = VerificationFailure::CountMismatch {
                        expected,
                        actual: delta,
                    };
                    return Err(CaptureError::Verification(failure));
                }
                debug!(parent: &self.span, delta, "on-camera images verified");
                Ok(())
            }
        }
    }
}
