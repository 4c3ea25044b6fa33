//! gphoto-timelapse: unattended time-lapse capture through `gphoto2`
//!
//! This library paces shots over long sessions, gates capture on daylight,
//! and verifies every exposure was produced, on disk or on the camera. The
//! camera is driven through trait-based abstractions so sessions can run
//! against real hardware or a mock camera.

pub mod download;
pub mod plan;
pub mod reset;
pub mod runner;
pub mod scheduler;
pub mod sun;
pub mod traits;
pub mod verify;

#[cfg(test)]
pub mod mock;

pub use download::{download_all, DownloadReport};
pub use plan::{CameraConfig, ExposureSpec, Location, Pacing, PlanError, Setting, ShootPlan};
pub use reset::{DeviceReset, Host};
pub use runner::ProcessRunner;
pub use scheduler::{CaptureScheduler, SessionPhase, SessionReport, SessionState};
pub use sun::SolarDaylight;
pub use traits::{
    CaptureError, Clock, CommandResult, CommandRunner, CommandSpec, DaylightOracle, SystemClock,
    VerificationFailure,
};
pub use verify::{CaptureOutcome, CaptureVerifier};
