//! Mock camera implementation for testing without hardware.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::plan::EXPOSURE_MODE_KEY;
use crate::runner::into_outcome;
use crate::traits::{Clock, CommandResult, CommandRunner, CommandSpec, Result};

/// Manually advanced clock. Sleeping advances time instantly.
pub struct MockClock {
    now: Cell<DateTime<Utc>>,
    sleeps: RefCell<Vec<Duration>>,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    /// Create a clock at a fixed midday instant.
    #[must_use]
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 6, 21, 12, 0, 0)
            .single()
            .expect("valid start time");
        Self {
            now: Cell::new(start),
            sleeps: RefCell::new(Vec::new()),
        }
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).expect("duration in range");
        self.now.set(self.now.get() + by);
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.advance(duration);
    }
}

const NO_CAMERA: &str = "\n*** Error: No camera found. ***\n\n";

/// Emulates `gphoto2` talking to a single camera.
///
/// Captures take time on the shared [`MockClock`]; failures can be injected
/// per capture.
pub struct MockCamera {
    clock: Rc<MockClock>,
    calls: RefCell<Vec<CommandSpec>>,
    settings: RefCell<BTreeMap<String, String>>,
    images: Cell<u32>,
    latencies: RefCell<VecDeque<Duration>>,
    drops: Cell<u32>,
    unplugged: Cell<u32>,
    connected: bool,
    captures: Cell<u32>,
}

impl MockCamera {
    /// Create a connected camera in manual mode with empty storage.
    #[must_use]
    pub fn new(clock: Rc<MockClock>) -> Self {
        let mut settings = BTreeMap::new();
        settings.insert(EXPOSURE_MODE_KEY.to_owned(), "Manual".to_owned());
        Self {
            clock,
            calls: RefCell::new(Vec::new()),
            settings: RefCell::new(settings),
            images: Cell::new(0),
            latencies: RefCell::new(VecDeque::new()),
            drops: Cell::new(0),
            unplugged: Cell::new(0),
            connected: true,
            captures: Cell::new(0),
        }
    }

    /// Set a configuration value the camera reports.
    #[must_use]
    pub fn with_setting(self, key: &str, value: &str) -> Self {
        self.settings
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
        self
    }

    /// Start with `count` images already on the card.
    #[must_use]
    pub fn with_images(self, count: u32) -> Self {
        self.images.set(count);
        self
    }

    /// Successive captures take these durations; later ones are instant.
    #[must_use]
    pub fn with_latencies<I: IntoIterator<Item = Duration>>(self, latencies: I) -> Self {
        self.latencies.borrow_mut().extend(latencies);
        self
    }

    /// The next `count` captures each lose their last exposure.
    #[must_use]
    pub fn dropping_exposures(self, count: u32) -> Self {
        self.drops.set(count);
        self
    }

    /// The next `count` captures report that no camera was found.
    #[must_use]
    pub fn unplugged_for(self, count: u32) -> Self {
        self.unplugged.set(count);
        self
    }

    /// Every camera command reports that no camera was found.
    #[must_use]
    pub const fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    /// Every command issued so far.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    /// Capture commands that ran.
    pub fn captures(&self) -> u32 {
        self.captures.get()
    }

    /// Images currently on the card.
    pub fn image_count(&self) -> u32 {
        self.images.get()
    }

    /// A configuration value, if set.
    pub fn setting(&self, key: &str) -> Option<String> {
        self.settings.borrow().get(key).cloned()
    }

    fn apply_settings(&self, command: &CommandSpec) {
        for pair in values_of(command, "--set-config-value") {
            if let Some((key, value)) = pair.split_once('=') {
                self.settings
                    .borrow_mut()
                    .insert(key.to_owned(), value.to_owned());
            }
        }
    }

    fn capture(&self, command: &CommandSpec) -> CommandResult {
        if self.unplugged.get() > 0 {
            self.unplugged.set(self.unplugged.get() - 1);
            return failed(NO_CAMERA);
        }

        self.apply_settings(command);
        let downloads = values_of(command, "--filename");
        let requested = command
            .args
            .iter()
            .filter(|arg| *arg == "--capture-image" || *arg == "--capture-image-and-download")
            .count();
        let dropped = usize::from(self.drops.get() > 0);
        self.drops.set(self.drops.get().saturating_sub(1));
        let taken = requested.saturating_sub(dropped);

        if downloads.is_empty() {
            let taken = u32::try_from(taken).expect("small exposure count");
            self.images.set(self.images.get() + taken);
        } else {
            for path in downloads.iter().take(taken) {
                std::fs::write(path, b"image").expect("write mock download");
            }
        }

        let latency = self.latencies.borrow_mut().pop_front().unwrap_or_default();
        self.clock.advance(latency);
        self.captures.set(self.captures.get() + 1);
        ok("")
    }

    fn get_config(&self, key: &str) -> CommandResult {
        match self.setting(key) {
            Some(value) => ok(&format!(
                "Label: {key}\nReadonly: 0\nType: RADIO\nCurrent: {value}\nEND\n"
            )),
            None => {
                let message = format!("*** Error: {key} not found in configuration tree. ***\n");
                failed(&message)
            }
        }
    }

    fn list_files(&self) -> CommandResult {
        let count = self.images.get();
        let folder = "/store_00010001/DCIM/100NIKON";
        let mut listing = format!("There are {count} files in folder '{folder}'.\n");
        for n in 1..=count {
            let _ = writeln!(listing, "#{n}     DSC_{n:04}.JPG   rd  5012 KB image/jpeg");
        }
        ok(&listing)
    }

    fn get_all_files(&self, command: &CommandSpec) -> CommandResult {
        let folder = values_of(command, "--filename")
            .first()
            .and_then(|pattern| Path::new(pattern).parent().map(Path::to_path_buf))
            .or_else(|| command.current_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."));
        for n in 1..=self.images.get() {
            std::fs::write(folder.join(format!("DSC_{n:04}.JPG")), b"image")
                .expect("write mock download");
        }
        ok("")
    }
}

impl CommandRunner for MockCamera {
    fn run(&self, command: &CommandSpec) -> Result<CommandResult> {
        self.calls.borrow_mut().push(command.clone());

        if command.program_name() == "killall" {
            return into_outcome(failed("No matching processes were found\n"));
        }
        if !self.connected {
            return into_outcome(failed(NO_CAMERA));
        }

        let result = if command.has_arg("--capture-image")
            || command.has_arg("--capture-image-and-download")
        {
            self.capture(command)
        } else if let Some(key) = command.value_of("--get-config") {
            self.get_config(key)
        } else if command.has_arg("--list-files") {
            self.list_files()
        } else if command.has_arg("--get-all-files") {
            self.get_all_files(command)
        } else if command.has_arg("--delete-all-files") {
            self.images.set(0);
            ok("")
        } else {
            self.apply_settings(command);
            ok("")
        };
        into_outcome(result)
    }
}

fn values_of(command: &CommandSpec, flag: &str) -> Vec<String> {
    command
        .args
        .iter()
        .zip(command.args.iter().skip(1))
        .filter(|(name, _)| *name == flag)
        .map(|(_, value)| value.to_string_lossy().into_owned())
        .collect()
}

fn ok(stdout: &str) -> CommandResult {
    CommandResult {
        program: "gphoto2".to_owned(),
        stdout: stdout.to_owned(),
        ..CommandResult::default()
    }
}

fn failed(stderr: &str) -> CommandResult {
    CommandResult {
        program: "gphoto2".to_owned(),
        stdout: String::new(),
        stderr: stderr.to_owned(),
        exit_code: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::CaptureError;

    fn gphoto2() -> CommandSpec {
        CommandSpec::new("/usr/local/bin/gphoto2")
    }

    #[test]
    fn test_mock_clock_sleep_advances() {
        let clock = MockClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_secs(3));
        clock.advance(Duration::from_secs(2));

        assert_eq!(clock.now() - start, chrono::Duration::seconds(5));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(3)]);
    }

    #[test]
    fn test_mock_camera_capture_on_camera() {
        let clock = Rc::new(MockClock::new());
        let camera = MockCamera::new(Rc::clone(&clock)).with_latencies([Duration::from_secs(4)]);
        let start = clock.now();

        camera
            .run(&gphoto2().args(["--capture-image", "--capture-image"]))
            .expect("capture");

        assert_eq!(camera.image_count(), 2);
        assert_eq!(camera.captures(), 1);
        assert_eq!(clock.now() - start, chrono::Duration::seconds(4));
    }

    #[test]
    fn test_mock_camera_unplugged() {
        let camera = MockCamera::new(Rc::new(MockClock::new())).unplugged_for(1);

        let capture = gphoto2().arg("--capture-image");
        let err = camera.run(&capture).expect_err("first capture fails");
        assert!(matches!(err, CaptureError::DeviceCommunication { .. }));

        camera.run(&capture).expect("second capture works");
        assert_eq!(camera.image_count(), 1);
    }

    #[test]
    fn test_mock_camera_unknown_setting() {
        let camera = MockCamera::new(Rc::new(MockClock::new()));
        let result = camera
            .run(&gphoto2().args(["--get-config", "/main/other/nothing"]))
            .expect("opaque failure is returned");
        assert!(!result.success());
    }
}
