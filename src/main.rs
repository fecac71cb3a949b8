// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use thingbeat::audio::output::{self, OutputDevice};
use thingbeat::audio::thread_priority::callback_thread_priority;
use thingbeat::audio::{OnsetDetector, Quantizer, WavCodec};
use thingbeat::cell::Category;
use thingbeat::clock::{loop_duration_seconds, BarsPerLoop};
use thingbeat::config::EngineConfig;
use thingbeat::controller::{keyboard, Controller, DeliveryOutcome};
use thingbeat::recording::RecordingSession;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Extra time allowed for a take to arrive after it should have finished.
const TAKE_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A tempo-locked sample engine."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trims or pads a clip to exactly one loop, starting at its first transient.
    Quantize {
        /// The clip to read. Any format symphonia can decode.
        input: PathBuf,
        /// Where to write the 16-bit WAV result.
        output: PathBuf,
        /// Tempo of the loop.
        #[arg(long, default_value_t = 120)]
        bpm: u32,
        /// Bars per loop (1, 2, 4, 8 or 16).
        #[arg(long, default_value_t = 4)]
        bars: u32,
        /// Start copying at frame 0 instead of the detected onset.
        #[arg(long)]
        no_onset: bool,
    },
    /// Prints the detected onset of a clip.
    Onset {
        input: PathBuf,
        #[arg(long, default_value_t = thingbeat::audio::onset::DEFAULT_THRESHOLD_RMS)]
        threshold: f32,
        #[arg(long, default_value_t = thingbeat::audio::onset::DEFAULT_WINDOW_SIZE)]
        window: usize,
    },
    /// Prints channels, sample rate and length of a clip.
    Info { input: PathBuf },
    /// Lists the available audio output devices.
    Devices {},
    /// Loads clips into cells and plays them through the output device.
    Play {
        /// Engine config file (YAML).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Output device name. Defaults to the host's default output.
        #[arg(short, long)]
        device: Option<String>,
        /// Record one bar-aligned two-loop take into this directory.
        #[arg(short, long)]
        record: Option<PathBuf>,
        /// Cells to load, in the form <SLOT>=<CATEGORY>:<FILE>.
        /// For example, 0=drum_loop:beat.mp3 4=synth_timbre:pad.wav
        cells: Vec<CellSpec>,
    },
}

/// A cell to load from the command line.
#[derive(Clone, Debug)]
struct CellSpec {
    slot: usize,
    category: Category,
    path: PathBuf,
}

impl FromStr for CellSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (slot, rest) = s
            .split_once('=')
            .ok_or_else(|| format!("expected <SLOT>=<CATEGORY>:<FILE>, got '{s}'"))?;
        let (category, path) = rest
            .split_once(':')
            .ok_or_else(|| format!("expected <CATEGORY>:<FILE>, got '{rest}'"))?;
        Ok(CellSpec {
            slot: slot
                .trim()
                .parse()
                .map_err(|e| format!("invalid slot '{slot}': {e}"))?,
            category: category.trim().parse()?,
            path: PathBuf::from(path),
        })
    }
}

fn extension_hint(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
}

fn decode_file(path: &Path) -> Result<thingbeat::audio::AudioBuffer, Box<dyn Error>> {
    let bytes = fs::read(path)?;
    Ok(WavCodec::decode_with_hint(
        &bytes,
        extension_hint(path).as_deref(),
    )?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Quantize {
            input,
            output,
            bpm,
            bars,
            no_onset,
        } => {
            let bars = BarsPerLoop::try_from(bars)?;
            let buffer = decode_file(&input)?;
            let target = loop_duration_seconds(bars, bpm);
            let quantized = Quantizer::default().quantize(&buffer, target, !no_onset)?;
            fs::write(&output, WavCodec::encode(&quantized)?)?;
            println!(
                "{} -> {}: {:.3}s at {} Hz ({} frames)",
                input.display(),
                output.display(),
                quantized.duration_seconds(),
                quantized.sample_rate(),
                quantized.frame_count()
            );
        }
        Commands::Onset {
            input,
            threshold,
            window,
        } => {
            let buffer = decode_file(&input)?;
            let onset = OnsetDetector::new(threshold, window).detect(&buffer);
            println!("{onset:.4}");
        }
        Commands::Info { input } => {
            let buffer = decode_file(&input)?;
            println!("Channels: {}", buffer.channel_count());
            println!("Sample rate: {} Hz", buffer.sample_rate());
            println!("Frames: {}", buffer.frame_count());
            println!("Duration: {:.3}s", buffer.duration_seconds());
        }
        Commands::Devices {} => {
            let devices = output::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Play {
            config,
            device,
            record,
            cells,
        } => play(config, device, record, cells).await?,
    }

    Ok(())
}

async fn play(
    config: Option<PathBuf>,
    device: Option<String>,
    record: Option<PathBuf>,
    cells: Vec<CellSpec>,
) -> Result<(), Box<dyn Error>> {
    let device = match device {
        Some(name) => OutputDevice::find(&name)?,
        None => OutputDevice::default_output()?,
    };
    info!(device = %device, "Using output device");

    let config = EngineConfig::load(config.as_deref())?
        .with_sample_rate(device.sample_rate())
        .with_output_channels(device.channels());
    let priority = callback_thread_priority(config.callback_thread_priority());
    let (controller, mixer) = Controller::new(config)?;
    let controller = Arc::new(controller);
    let _stream = device.start(mixer, priority)?;

    for spec in cells {
        let request = controller.request(spec.slot, spec.category, None)?;
        let bytes = fs::read(&spec.path)?;
        let outcome = controller
            .deliver(
                request.token,
                bytes,
                request.duration_seconds,
                extension_hint(&spec.path),
            )
            .await;
        match outcome {
            DeliveryOutcome::Ready => println!("Cell {} ready: {}", spec.slot, spec.path.display()),
            other => warn!(slot = spec.slot, outcome = ?other, "Cell did not load"),
        }
    }

    if let Some(dir) = record {
        let mut session = RecordingSession::start(&controller)?;
        println!(
            "Recording starts in {:.2}s and lasts {:.2}s.",
            session.seconds_until_start(),
            session.duration_seconds()
        );
        let timeout = Duration::from_secs_f64(session.seconds_until_start() + session.duration_seconds())
            + TAKE_GRACE;
        let recorder = controller.clone();
        let export =
            tokio::task::spawn_blocking(move || session.finish(&recorder, timeout)).await??;
        let master = export.write_to_dir(&dir)?;
        println!("Recording written to {}", master.display());
    }

    controller.run(Arc::new(keyboard::Driver::new())).await;
    Ok(())
}
