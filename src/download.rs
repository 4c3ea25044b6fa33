//! Download-only mode: pull every image off the camera without shooting.

use std::path::Path;

use tracing::{info, Span};

use crate::plan::CameraConfig;
use crate::reset::{DeviceReset, Host};
use crate::traits::{CommandRunner, Result};

/// Summary of a download-only run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReport {
    /// Files present in the destination afterwards.
    pub files_in_folder: usize,
    /// Whether the camera's storage was wiped.
    pub deleted: bool,
}

/// Copy all images from the camera into `folder`, skipping files already
/// there, and optionally delete them from the camera afterwards.
///
/// Processes that hold the camera on `host` are stopped before the transfer.
pub fn download_all<R: CommandRunner>(
    runner: &R,
    camera: &CameraConfig,
    host: Host,
    folder: &Path,
    delete: bool,
    span: &Span,
) -> Result<DownloadReport> {
    let release = DeviceReset::new(runner, camera, host, span.clone());
    info!(parent: span, host = ?release.host(), "releasing camera");
    release.kill_interfering()?;

    std::fs::create_dir_all(folder)?;

    info!(parent: span, folder = %folder.display(), "downloading images from camera");
    let pattern = folder.join("%f.%C");
    let get = camera
        .gphoto2()
        .arg("--get-all-files")
        .arg("--skip-existing")
        .arg("--filename")
        .arg(&pattern)
        .current_dir(folder);
    runner.run(&get)?.check()?;

    if delete {
        info!(parent: span, "deleting images from camera");
        let wipe = camera.gphoto2().arg("--delete-all-files").arg("--recurse");
        runner.run(&wipe)?.check()?;
    }

    let files_in_folder = std::fs::read_dir(folder)?
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
        .count();
    info!(parent: span, files = files_in_folder, "download complete");

    Ok(DownloadReport {
        files_in_folder,
        deleted: delete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCamera, MockClock};
    use std::rc::Rc;

    fn camera() -> MockCamera {
        MockCamera::new(Rc::new(MockClock::new()))
    }

    fn download(
        mock: &MockCamera,
        host: Host,
        folder: &Path,
        delete: bool,
    ) -> Result<DownloadReport> {
        let config = CameraConfig::default();
        download_all(mock, &config, host, folder, delete, &Span::none())
    }

    #[test]
    fn test_download_keeps_camera_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mock = camera().with_images(3);

        let report = download(&mock, Host::MacOs, dir.path(), false);
        let report = report.expect("download should succeed");

        assert_eq!(report.files_in_folder, 3);
        assert!(!report.deleted);
        assert_eq!(mock.image_count(), 3);

        let calls = mock.calls();
        let get = calls.iter().find(|cmd| cmd.has_arg("--get-all-files"));
        let get = get.expect("get-all-files issued");
        assert!(get.has_arg("--skip-existing"));
        assert_eq!(get.current_dir.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_download_releases_camera_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mock = camera().with_images(1);

        let report = download(&mock, Host::RaspberryPi, dir.path(), false);
        report.expect("download should succeed");

        let calls = mock.calls();
        let transfer = calls.iter().position(|cmd| cmd.has_arg("--get-all-files"));
        let transfer = transfer.expect("get-all-files issued");
        let stopped: Vec<String> = calls
            .iter()
            .take(transfer)
            .filter(|cmd| cmd.program_name() == "killall")
            .filter_map(|cmd| cmd.args.first())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(stopped, ["gvfs-gphoto2-volume-monitor", "gvfsd-gphoto2"]);
    }

    #[test]
    fn test_download_then_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("nested").join("pull");
        let mock = camera().with_images(2);

        let report = download(&mock, Host::MacOs, &target, true);
        let report = report.expect("download should succeed");

        assert_eq!(report.files_in_folder, 2);
        assert!(report.deleted);
        assert_eq!(mock.image_count(), 0);
    }

    #[test]
    fn test_download_without_camera() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mock = camera().disconnected();

        let result = download(&mock, Host::MacOs, dir.path(), true);
        let err = result.expect_err("no camera");
        assert!(err.is_retryable());
        let calls = mock.calls();
        assert!(calls.iter().all(|cmd| !cmd.has_arg("--delete-all-files")));
    }
}
