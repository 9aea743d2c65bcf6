//! Application entry point for the S/PDIF router.
//!
//! # Startup sequence
//!
//! 1. Parse the command line and initialise logging.
//! 2. Load [`RouterConfig`] from disk (writing defaults on first run) and
//!    validate it.
//! 3. Open the capture source.
//! 4. Run the classifier loop until capture or a pipeline open fails.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use spdif_router::{
    audio::{list_devices, CpalCapture},
    config::{AppPaths, RouterConfig},
    router::{self, DeviceSinks, StreamClassifier},
};

/// Command-line arguments for spdif-router
#[derive(Parser, Debug)]
#[command(name = "spdif-router")]
#[command(about = "Route an S/PDIF capture to PCM or IEC 61937 playback")]
#[command(version)]
struct Args {
    /// Capture source ("default" or a device name from --list-devices)
    #[arg(required_unless_present = "list_devices")]
    source: Option<String>,

    /// Playback latency in microseconds
    latency_us: Option<u32>,

    /// Settings file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print capture and playback device names and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match route(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn route(args: Args) -> Result<()> {
    if args.list_devices {
        return print_devices();
    }
    let source = args.source.context("no capture source given")?;

    let path = args.config.unwrap_or_else(|| AppPaths::new().settings_file);
    let config = RouterConfig::load_or_create(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    config.validate().context("invalid configuration")?;

    let latency_us = match args.latency_us {
        Some(0) => {
            log::warn!("invalid sink latency, using default");
            None
        }
        other => other,
    };

    let capture_cfg = config.capture.clone();
    let mut capture = CpalCapture::open(&source, capture_cfg.sample_rate, capture_cfg.channels)
        .with_context(|| format!("failed to open capture source {source:?}"))?;
    log::info!(
        "capturing from {source:?} ({} Hz, {} ch, {} byte chunks)",
        capture_cfg.sample_rate,
        capture_cfg.channels,
        capture_cfg.chunk_bytes
    );

    let detection_window = config.detection_window;
    let mut classifier = StreamClassifier::new(DeviceSinks::new(config, latency_us), detection_window);

    let err = router::run(&mut capture, &mut classifier, capture_cfg.chunk_bytes);
    Err(err).context("routing stopped")
}

fn print_devices() -> Result<()> {
    let devices = list_devices().context("failed to enumerate audio devices")?;

    println!("capture devices:");
    for name in &devices.inputs {
        println!("  {name}");
    }
    println!("playback devices:");
    for name in &devices.outputs {
        println!("  {name}");
    }
    Ok(())
}
