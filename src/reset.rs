//! Bringing the camera and its host into a known-good state.

use tracing::{info, warn, Span};

use crate::plan::CameraConfig;
use crate::traits::{CaptureError, CommandRunner, CommandSpec, Result};

/// Host platform the session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host {
    /// Raspberry Pi (Linux with GVFS).
    RaspberryPi,
    /// macOS.
    MacOs,
}

impl Host {
    /// Map the `--pi` command-line flag to a host.
    pub const fn from_pi_flag(on_raspberry_pi: bool) -> Self {
        if on_raspberry_pi {
            Self::RaspberryPi
        } else {
            Self::MacOs
        }
    }

    /// Processes that grab the camera and block `gphoto2` on this host.
    pub const fn interfering_processes(self) -> &'static [&'static str] {
        match self {
            Self::RaspberryPi => &["gvfs-gphoto2-volume-monitor", "gvfsd-gphoto2"],
            Self::MacOs => &["PTPCamera"],
        }
    }
}

/// Extract the `Current:` value from `gphoto2 --get-config` output.
pub fn current_value(output: &str) -> Option<&str> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Current:"))
        .map(str::trim)
}

/// Resets the camera and checks it is configured for unattended capture.
#[derive(Debug)]
pub struct DeviceReset<'a, R> {
    runner: &'a R,
    camera: &'a CameraConfig,
    host: Host,
    span: Span,
}

impl<R> Clone for DeviceReset<'_, R> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner,
            camera: self.camera,
            host: self.host,
            span: self.span.clone(),
        }
    }
}

impl<'a, R: CommandRunner> DeviceReset<'a, R> {
    /// Create a reset protocol for `camera` on `host`.
    pub const fn new(runner: &'a R, camera: &'a CameraConfig, host: Host, span: Span) -> Self {
        Self {
            runner,
            camera,
            host,
            span,
        }
    }

    /// Camera this protocol drives.
    pub const fn camera(&self) -> &'a CameraConfig {
        self.camera
    }

    /// Host this protocol targets.
    pub const fn host(&self) -> Host {
        self.host
    }

    /// Terminate processes known to hold the camera. Missing processes are
    /// not an error.
    pub fn kill_interfering(&self) -> Result<()> {
        for name in self.host.interfering_processes() {
            let result = self.runner.run(&CommandSpec::new("killall").arg(name))?;
            if result.success() {
                info!(parent: &self.span, process = name, "stopped interfering process");
            }
        }
        Ok(())
    }

    /// Reset the camera's USB connection, then clear competing processes.
    pub fn reset(&self) -> Result<()> {
        info!(parent: &self.span, "resetting camera");
        let reset = self.camera.gphoto2().arg("--reset");
        self.runner.run(&reset)?.check()?;
        self.kill_interfering()
    }

    /// Read one configuration value from the camera.
    pub fn read_setting(&self, key: &str) -> Result<Option<String>> {
        let query = self.camera.gphoto2().arg("--get-config").arg(key);
        let result = self.runner.run(&query)?.check()?;
        Ok(current_value(&result.stdout).map(str::to_owned))
    }

    /// Prepare the camera for a session.
    ///
    /// Stops interfering processes, resets the camera, confirms every
    /// required setting (manual exposure mode by default) and finally applies
    /// the initialization settings. Calling this again on a correctly
    /// configured camera reissues the same commands and succeeds.
    pub fn initialize(&self) -> Result<()> {
        info!(parent: &self.span, host = ?self.host, "initializing settings");

        self.kill_interfering()?;
        self.reset()?;

        if self.runner.executes() {
            for required in &self.camera.require {
                let current = self.read_setting(&required.key)?;
                if current.as_deref() != Some(required.value.as_str()) {
                    let key = &required.key;
                    let wanted = &required.value;
                    let reported = current.as_deref().unwrap_or("unset");
                    let message = format!("{key} is \"{reported}\", expected \"{wanted}\"");
                    return Err(CaptureError::Configuration(message));
                }
                info!(
                    parent: &self.span,
                    key = %required.key,
                    value = %required.value,
                    "camera setting confirmed"
                );
            }
        } else {
            warn!(parent: &self.span, "dry run: skipping camera setting checks");
        }

        if let Some(init) = self.camera.init_command() {
            self.runner.run(&init)?.check()?;
            info!(
                parent: &self.span,
                count = self.camera.init.len(),
                "applied initialization settings"
            );
        }
        Ok(())
    }
}
