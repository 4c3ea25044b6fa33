//! Shoot plan: what to capture, how often, and where it goes.
//!
//! Plans are read from a TOML file and stay immutable for the duration of a
//! session. The plan also knows how to turn its exposure list into a typed
//! `gphoto2` invocation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::traits::CommandSpec;

/// Default location of the `gphoto2` executable.
pub const DEFAULT_GPHOTO2: &str = "/usr/local/bin/gphoto2";

/// Camera setting holding the exposure program.
pub const EXPOSURE_MODE_KEY: &str = "/main/capturesettings/autoexposuremode";

/// Error type for plan loading.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not a valid plan document.
    #[error("failed to parse shoot plan: {0}")]
    Parse(#[from] toml::de::Error),
    /// The document parsed but describes an impossible shoot.
    #[error("invalid shoot plan: {0}")]
    Invalid(String),
}

/// A camera setting as a `key`/`value` pair.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Setting {
    /// gphoto2 configuration path or name.
    pub key: String,
    /// Value, as gphoto2 prints it.
    pub value: String,
}

impl Setting {
    /// Create a setting.
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

fn invalid<S: Into<String>>(message: S) -> PlanError {
    PlanError::Invalid(message.into())
}

fn default_gphoto2() -> PathBuf {
    PathBuf::from(DEFAULT_GPHOTO2)
}

fn default_required() -> Vec<Setting> {
    vec![Setting::new(EXPOSURE_MODE_KEY, "Manual")]
}

/// How to reach and prepare the camera.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraConfig {
    /// Path to the `gphoto2` executable.
    #[serde(default = "default_gphoto2")]
    pub gphoto2: PathBuf,
    /// Explicit `--port`, when more than one device is attached.
    #[serde(default)]
    pub port: Option<String>,
    /// Folder on the camera's storage to count images in.
    #[serde(default)]
    pub folder: Option<String>,
    /// Settings applied once after the camera checks pass.
    #[serde(default)]
    pub init: Vec<Setting>,
    /// Settings the camera must already report before shooting.
    #[serde(default = "default_required")]
    pub require: Vec<Setting>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            gphoto2: default_gphoto2(),
            port: None,
            folder: None,
            init: Vec::new(),
            require: default_required(),
        }
    }
}

impl CameraConfig {
    /// A `gphoto2` command with the port selection already applied.
    pub fn gphoto2(&self) -> CommandSpec {
        let cmd = CommandSpec::new(&self.gphoto2);
        match &self.port {
            Some(port) => cmd.arg("--port").arg(port),
            None => cmd,
        }
    }

    /// The command applying the `init` settings, or `None` if there are none.
    pub fn init_command(&self) -> Option<CommandSpec> {
        if self.init.is_empty() {
            return None;
        }
        let cmd = self.init.iter().fold(self.gphoto2(), |cmd, setting| {
            cmd.arg("--set-config-value")
                .arg(format!("{}={}", setting.key, setting.value))
        });
        Some(cmd)
    }
}

/// Capture parameters for one exposure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExposureSpec {
    /// Shutter speed, e.g. `1/250`.
    #[serde(default)]
    pub shutterspeed: Option<String>,
    /// Aperture, e.g. `8`.
    #[serde(default)]
    pub aperture: Option<String>,
    /// ISO sensitivity.
    #[serde(default)]
    pub iso: Option<String>,
    /// Any other configuration values to set before this exposure.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ExposureSpec {
    /// Settings for this exposure, in the order they are applied.
    pub fn settings(&self) -> Vec<Setting> {
        let named = [
            ("shutterspeed", self.shutterspeed.as_deref()),
            ("aperture", self.aperture.as_deref()),
            ("iso", self.iso.as_deref()),
        ];
        let extra = self.extra.iter().map(|(k, v)| Setting::new(k, v));
        named
            .into_iter()
            .filter_map(|(key, value)| Some(Setting::new(key, value?)))
            .chain(extra)
            .collect()
    }
}

const fn default_twilight() -> f64 {
    -6.0
}

/// Where the camera is, for daylight gating.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Location {
    /// Latitude in degrees, north positive.
    pub latitude: f64,
    /// Longitude in degrees, east positive.
    pub longitude: f64,
    /// Solar elevation (degrees) above which it counts as light.
    #[serde(default = "default_twilight")]
    pub twilight_degrees: f64,
}

impl Location {
    fn validate(&self) -> Result<(), PlanError> {
        let latitude = self.latitude;
        let longitude = self.longitude;
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(invalid(format!("latitude {latitude} out of range")));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(invalid(format!("longitude {longitude} out of range")));
        }
        Ok(())
    }
}

const fn default_dark_poll() -> u64 {
    60
}

const fn default_retries() -> u32 {
    1
}

/// Scheduler tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pacing {
    /// Minimum seconds between daylight checks while it is dark. A longer
    /// shot delay spaces the checks instead.
    #[serde(default = "default_dark_poll")]
    pub dark_poll_secs: u64,
    /// Extra attempts per shot, each preceded by a camera reset.
    #[serde(default = "default_retries")]
    pub capture_retries: u32,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            dark_poll_secs: default_dark_poll(),
            capture_retries: default_retries(),
        }
    }
}

impl Pacing {
    /// Dark poll interval as a duration.
    pub const fn dark_poll(&self) -> Duration {
        Duration::from_secs(self.dark_poll_secs)
    }
}

fn default_extension() -> String {
    "jpg".to_owned()
}

/// A complete shoot description.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShootPlan {
    /// Number of shots to take.
    pub shots: u32,
    /// Target interval between the starts of consecutive shots, in seconds.
    pub delay_secs: u64,
    /// Local folder downloaded exposures are written to.
    pub folder: PathBuf,
    /// Download each exposure, or leave it on the camera.
    #[serde(default)]
    pub download: bool,
    /// Shoot regardless of daylight.
    #[serde(default)]
    pub ignore_sun: bool,
    /// File suffix of downloaded exposures.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Camera access and preparation.
    #[serde(default)]
    pub camera: CameraConfig,
    /// Observer position for daylight gating.
    #[serde(default)]
    pub location: Option<Location>,
    /// Scheduler tuning.
    #[serde(default)]
    pub pacing: Pacing,
    /// Exposures taken for every shot, in order.
    pub exposures: Vec<ExposureSpec>,
}

/// A capture invocation and the files it is expected to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    /// The command to run.
    pub command: CommandSpec,
    /// Files the command writes locally; empty when images stay on the camera.
    pub produced_files: Vec<PathBuf>,
}

impl ShootPlan {
    /// Load and validate a plan from a TOML file.
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let text = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        text.parse()
    }

    /// Check the plan describes a shoot that can run.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.exposures.is_empty() {
            return Err(invalid("at least one exposure is required"));
        }
        let extension = &self.extension;
        if extension.is_empty() || extension.contains('/') {
            return Err(invalid(format!("bad file extension {extension:?}")));
        }
        match self.location {
            Some(location) => location.validate(),
            None if self.ignore_sun => Ok(()),
            None => Err(invalid("a [location] is required without ignore_sun")),
        }
    }

    /// Apply command-line overrides for shot count and delay.
    #[must_use]
    pub fn with_overrides(mut self, shots: Option<u32>, delay_secs: Option<u64>) -> Self {
        if let Some(shots) = shots {
            self.shots = shots;
        }
        if let Some(delay_secs) = delay_secs {
            self.delay_secs = delay_secs;
        }
        self
    }

    /// Target interval between the starts of consecutive shots.
    pub const fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    /// Build the command for shot number `shot` (1-based) started at `taken_at`.
    pub fn capture_command(&self, shot: u32, taken_at: DateTime<Utc>) -> CaptureCommand {
        let stamp = taken_at.format("%Y%m%d-%H%M%S");
        let mut command = self.camera.gphoto2();
        if self.download {
            // a retried shot reuses its file names
            command = command.arg("--force-overwrite");
        }
        let mut produced_files = Vec::new();

        for (index, exposure) in self.exposures.iter().enumerate() {
            for setting in exposure.settings() {
                command = command
                    .arg("--set-config-value")
                    .arg(format!("{}={}", setting.key, setting.value));
            }
            if self.download {
                let path = self.folder.join(format!(
                    "{stamp}-{shot:05}-{:02}.{}",
                    index + 1,
                    self.extension
                ));
                command = command
                    .arg("--filename")
                    .arg(&path)
                    .arg("--capture-image-and-download");
                produced_files.push(path);
            } else {
                command = command.arg("--capture-image");
            }
        }

        CaptureCommand {
            command,
            produced_files,
        }
    }
}

impl std::str::FromStr for ShootPlan {
    type Err = PlanError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let plan: Self = toml::from_str(text)?;
        plan.validate()?;
        Ok(plan)
    }
}
