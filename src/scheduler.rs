//! The capture loop: daylight gating, shot issuance, verification and
//! drift-compensated pacing.
//!
//! A session runs on one thread and blocks on every camera command; the
//! camera only ever sees one command at a time.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn, Span};

use crate::plan::ShootPlan;
use crate::reset::{DeviceReset, Host};
use crate::traits::{CaptureError, Clock, CommandRunner, DaylightOracle, Result};
use crate::verify::{CaptureOutcome, CaptureVerifier};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Preparing the camera.
    Initializing,
    /// Dark out; waiting before the next daylight check.
    WaitingForLight,
    /// Issuing a capture command.
    Capturing,
    /// Checking the capture produced its exposures.
    Verifying,
    /// Sleeping until the next shot is due.
    Delaying,
    /// All shots taken.
    Done,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::WaitingForLight => "waiting-for-light",
            Self::Capturing => "capturing",
            Self::Verifying => "verifying",
            Self::Delaying => "delaying",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Counters owned by a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Verified shots so far. Never exceeds the plan's shot count.
    pub shots_taken: u32,
    /// When the session started.
    pub session_start: DateTime<Utc>,
}

/// Summary returned when a session completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Verified shots taken.
    pub shots_taken: u32,
    /// Iterations skipped because it was dark.
    pub dark_polls: u32,
    /// Capture attempts repeated after a reset.
    pub retries: u32,
    /// Final phase; always [`SessionPhase::Done`].
    pub phase: SessionPhase,
}

/// Time left before the next shot is due.
///
/// `delay` is the target interval between shot starts, so time already
/// spent since `started` is subtracted. Overruns yield zero.
pub fn remaining_delay(delay: Duration, started: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let elapsed = (now - started).to_std().unwrap_or(Duration::ZERO);
    delay.saturating_sub(elapsed)
}

/// Drives one capture session from initialization to the last shot.
pub struct CaptureScheduler<'a, R, C, D> {
    plan: &'a ShootPlan,
    runner: &'a R,
    clock: &'a C,
    daylight: &'a D,
    reset: DeviceReset<'a, R>,
    verifier: CaptureVerifier<'a, R>,
    start_delay: Duration,
    phase: SessionPhase,
    span: Span,
}

impl<'a, R, C, D> CaptureScheduler<'a, R, C, D>
where
    R: CommandRunner,
    C: Clock,
    D: DaylightOracle,
{
    /// Create a scheduler for `plan`.
    pub fn new(
        plan: &'a ShootPlan,
        runner: &'a R,
        clock: &'a C,
        daylight: &'a D,
        host: Host,
        span: Span,
    ) -> Self {
        let reset = DeviceReset::new(runner, &plan.camera, host, span.clone());
        let verifier = CaptureVerifier::new(runner, reset.clone(), span.clone());
        Self {
            plan,
            runner,
            clock,
            daylight,
            reset,
            verifier,
            start_delay: Duration::ZERO,
            phase: SessionPhase::Initializing,
            span,
        }
    }

    /// Wait this long before touching the camera.
    #[must_use]
    pub const fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Current phase.
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn enter(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            debug!(parent: &self.span, from = %self.phase, to = %phase, "phase");
            self.phase = phase;
        }
    }

    /// Run the session to completion.
    ///
    /// Returns once the plan's shot count is reached. Any failure that
    /// survives the retry budget aborts the session.
    pub fn run(&mut self) -> Result<SessionReport> {
        let plan = self.plan;
        info!(
            parent: &self.span,
            shots = plan.shots,
            delay_secs = plan.delay_secs,
            exposures = plan.exposures.len(),
            download = plan.download,
            "starting session"
        );

        if !self.start_delay.is_zero() {
            info!(parent: &self.span, secs = self.start_delay.as_secs(), "waiting before start");
            self.clock.sleep(self.start_delay);
        }

        self.enter(SessionPhase::Initializing);
        self.reset.initialize()?;
        if plan.download && self.runner.executes() {
            std::fs::create_dir_all(&plan.folder)?;
        }

        let mut state = SessionState {
            shots_taken: 0,
            session_start: self.clock.now(),
        };
        let mut report = SessionReport {
            shots_taken: 0,
            dark_polls: 0,
            retries: 0,
            phase: SessionPhase::Initializing,
        };

        while state.shots_taken < plan.shots {
            let t_init = self.clock.now();

            if !plan.ignore_sun && !self.daylight.is_light(t_init) {
                self.enter(SessionPhase::WaitingForLight);
                report.dark_polls += 1;
                let wait = remaining_delay(plan.delay(), t_init, self.clock.now());
                let wait = wait.max(plan.pacing.dark_poll());
                info!(
                    parent: &self.span,
                    wait_secs = wait.as_secs(),
                    "waiting for the sun to come out"
                );
                self.clock.sleep(wait);
                continue;
            }

            let shot = state.shots_taken + 1;
            report.retries += self.shoot(shot, t_init)?;
            state.shots_taken = shot;
            info!(parent: &self.span, shot, of = plan.shots, "shot verified");

            if state.shots_taken == plan.shots {
                break;
            }

            self.enter(SessionPhase::Delaying);
            let wait = remaining_delay(plan.delay(), t_init, self.clock.now());
            if wait.is_zero() {
                debug!(parent: &self.span, "capture overran the delay; next shot immediately");
            } else {
                info!(parent: &self.span, wait_secs = wait.as_secs_f64(), "waiting");
                self.clock.sleep(wait);
            }
        }

        self.enter(SessionPhase::Done);
        let elapsed = self.clock.now() - state.session_start;
        info!(
            parent: &self.span,
            shots = state.shots_taken,
            elapsed_secs = elapsed.num_seconds(),
            "all done"
        );

        report.shots_taken = state.shots_taken;
        report.phase = self.phase;
        Ok(report)
    }

    /// Take and verify one shot, resetting and retrying retryable failures.
    /// Returns the number of retries used.
    fn shoot(&mut self, shot: u32, taken_at: DateTime<Utc>) -> Result<u32> {
        let budget = self.plan.pacing.capture_retries;
        let mut retries = 0;
        loop {
            match self.attempt(shot, taken_at) {
                Ok(()) => return Ok(retries),
                Err(err) if err.is_retryable() && retries < budget => {
                    retries += 1;
                    warn!(
                        parent: &self.span,
                        shot,
                        attempt = retries + 1,
                        error = %err,
                        "capture failed, resetting camera"
                    );
                    self.reset.reset()?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn attempt(&mut self, shot: u32, taken_at: DateTime<Utc>) -> Result<()> {
        let plan = self.plan;
        let before = if plan.download || !self.runner.executes() {
            0
        } else {
            self.verifier.count_camera_images()?
        };

        self.enter(SessionPhase::Capturing);
        info!(parent: &self.span, shot, exposures = plan.exposures.len(), "taking exposure(s)");
        let capture = plan.capture_command(shot, taken_at);
        if plan.download && self.runner.executes() {
            clear_targets(&capture.produced_files, &self.span)?;
        }
        self.runner.run(&capture.command)?.check()?;

        self.enter(SessionPhase::Verifying);
        let outcome = if plan.download {
            CaptureOutcome::Downloaded {
                produced_files: capture.produced_files,
            }
        } else if self.runner.executes() {
            CaptureOutcome::OnCamera {
                after: self.verifier.count_camera_images()?,
            }
        } else {
            CaptureOutcome::OnCamera { after: before }
        };
        self.verifier.verify(plan, before, &outcome)?;

        if plan.download {
            info!(parent: &self.span, folder = %plan.folder.display(), "image(s) saved");
        }
        Ok(())
    }
}

impl<R, C, D> fmt::Debug for CaptureScheduler<'_, R, C, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureScheduler")
            .field("shots", &self.plan.shots)
            .field("phase", &self.phase)
            .field("start_delay", &self.start_delay)
            .finish_non_exhaustive()
    }
}

/// Remove files left at a capture's target paths, so only the files written
/// by the coming capture can pass verification.
fn clear_targets(paths: &[PathBuf], span: &Span) -> Result<()> {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!(parent: span, path = %path.display(), "removed stale capture target");
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Short name of the failure class, for the final log line.
pub const fn failure_class(err: &CaptureError) -> &'static str {
    match err {
        CaptureError::DeviceCommunication { .. } => "device communication",
        CaptureError::Configuration(_) => "configuration",
        CaptureError::Verification(_) => "capture verification",
        CaptureError::CommandFailed { .. } | CaptureError::Spawn { .. } => "command",
        CaptureError::Io(_) => "i/o",
    }
}
