//! # Solfeggio Analyzer - Terminal Host
//!
//! Runs the analysis pipeline against the default input device and prints a
//! status readout.
//!
//! ## Architecture
//! - **Main Thread**: owns the audio stream and the pipeline, runs the tick loop
//! - **Stdin Thread**: turns each Enter press into a capture request
//! - **Ctrl-C Handler**: requests shutdown
//! - **Communication**: crossbeam channels; captures run on the tick thread, so
//!   the session counters are never shared

mod logging;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender, select};
use solfeggio_core::{AnalyzerConfig, CpalFrameSource, FrameSource, Pipeline, audio};
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

#[derive(Debug, Parser)]
#[command(name = "solfeggio", version, about = "Live reference-tone analyzer")]
struct Cli {
    /// TOML configuration file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Print capture reports as JSON lines
    #[arg(long)]
    json: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

/// Requests delivered to the tick loop.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Capture,
    Shutdown,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;

    if cli.list_devices {
        for (index, name) in audio::list_input_devices()?.iter().enumerate() {
            println!("{index}: {name}");
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => AnalyzerConfig::load(path)?,
        None => AnalyzerConfig::default(),
    };

    // The source lives until the end of main; dropping it releases the device on
    // every path below, including a failed calibration.
    let mut source = CpalFrameSource::open(config.sample_rate, config.buffer_size)
        .context("opening audio input")?;
    config.sample_rate = source.sample_rate();

    // Ctrl-C during calibration is queued and checked once calibration ends.
    let (command_tx, command_rx) = crossbeam_channel::unbounded();
    install_ctrlc(command_tx.clone())?;

    let mut pipeline = match Pipeline::calibrate(config, &mut source) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!("Fatal: {e:#}");
            return Err(e);
        }
    };

    if shutdown_requested(&command_rx) {
        tracing::info!("Interrupted during calibration");
        return Ok(());
    }
    spawn_stdin_reader(command_tx);

    println!("Listening. Press Enter to capture the session, Ctrl-C to quit.");
    run(&mut pipeline, &mut source, &command_rx, cli.json)?;

    tracing::info!("Shutting down");
    Ok(())
}

/// The periodic tick loop. Returns when shutdown is requested.
fn run<S: FrameSource>(
    pipeline: &mut Pipeline,
    source: &mut S,
    commands: &Receiver<Command>,
    json: bool,
) -> Result<()> {
    let ticker = crossbeam_channel::tick(pipeline.config().tick_interval());
    let mut last_status = String::new();

    loop {
        select! {
            recv(ticker) -> _ => {
                if let Some(analysis) = pipeline.tick(source) {
                    tracing::debug!(
                        levels = %report::format_levels(pipeline.targets(), &analysis.target_levels),
                        "Tick"
                    );
                    let status = report::format_active(&analysis.active);
                    if status != last_status {
                        println!("{status}");
                        last_status = status;
                    }
                }
            },
            recv(commands) -> command => match command {
                Ok(Command::Capture) => {
                    let capture = pipeline.capture();
                    if json {
                        println!("{}", serde_json::to_string(&capture)?);
                    } else {
                        print!("{}", report::format_report(&capture));
                    }
                }
                Ok(Command::Shutdown) | Err(_) => break,
            },
        }
    }
    Ok(())
}

/// Whether a shutdown was queued before the loop started.
fn shutdown_requested(commands: &Receiver<Command>) -> bool {
    commands.try_iter().any(|c| c == Command::Shutdown)
}

fn install_ctrlc(sender: Sender<Command>) -> Result<()> {
    ctrlc::set_handler(move || {
        let _ = sender.send(Command::Shutdown);
    })
    .context("setting Ctrl-C handler")
}

/// Each line read from stdin requests one capture.
fn spawn_stdin_reader(sender: Sender<Command>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            if line.is_err() || sender.send(Command::Capture).is_err() {
                break;
            }
        }
        tracing::debug!("Stdin closed; captures via Enter are no longer available");
    });
}
