//! gphoto-timelapse binary: run a time-lapse session from a shoot plan.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::{error, info, info_span};
use tracing_subscriber::EnvFilter;

use gphoto_timelapse::scheduler::failure_class;
use gphoto_timelapse::{
    download_all, CaptureError, CaptureScheduler, DaylightOracle, Host, ProcessRunner, ShootPlan,
    SolarDaylight, SystemClock,
};

#[derive(Parser)]
#[command(name = "gphoto-timelapse", version, about)]
struct Cli {
    /// Shoot plan (TOML)
    config: PathBuf,

    /// Only download the images already on the camera, then exit
    #[arg(long)]
    download: bool,

    /// With --download, delete the images from the camera afterwards
    #[arg(long, requires = "download")]
    delete: bool,

    /// Running on a Raspberry Pi (affects which processes are stopped)
    #[arg(long)]
    pi: bool,

    /// Override the number of shots
    #[arg(long = "num-shots")]
    num_shots: Option<u32>,

    /// Override the delay between shots, in seconds
    #[arg(long)]
    delay: Option<u64>,

    /// Seconds to wait before starting
    #[arg(long, default_value_t = 0)]
    wait: u64,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log commands without running them
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = init_logging(cli.log_file.as_ref()) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }

    if let Err(err) = run(cli) {
        let class = err
            .downcast_ref::<CaptureError>()
            .map_or("session", failure_class);
        error!(class, "{err:#}");
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let plan = ShootPlan::load(&cli.config)
        .with_context(|| format!("load shoot plan {}", cli.config.display()))?
        .with_overrides(cli.num_shots, cli.delay);

    let span = info_span!("timelapse", config = %cli.config.display());
    let runner = ProcessRunner::new(!cli.dry_run, span.clone());

    if cli.download {
        let report = download_all(
            &runner,
            &plan.camera,
            Host::from_pi_flag(cli.pi),
            &plan.folder,
            cli.delete,
            &span,
        )?;
        info!(parent: &span, files = report.files_in_folder, "downloaded");
        return Ok(());
    }

    let sun = plan.location.map(SolarDaylight::new);
    let daylight = move |at: DateTime<Utc>| sun.map_or(true, |sun| sun.is_light(at));

    let clock = SystemClock;
    let host = Host::from_pi_flag(cli.pi);
    let scheduler = CaptureScheduler::new(&plan, &runner, &clock, &daylight, host, span.clone());
    let mut scheduler = scheduler.with_start_delay(Duration::from_secs(cli.wait));

    let report = scheduler.run()?;
    info!(
        parent: &span,
        shots = report.shots_taken,
        retries = report.retries,
        dark_polls = report.dark_polls,
        "session complete"
    );
    Ok(())
}
