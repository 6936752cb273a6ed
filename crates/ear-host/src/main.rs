//! EAR Host - command-line driver for the adaptive equalization engine
//!
//! Usage:
//!   ear-host devices                 - List audio devices
//!   ear-host config                  - Print the default configuration
//!   ear-host run [--simulate]        - Run against a device or a simulated room

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};

use ear_audio::{AudioConfig, AudioTransport, CpalTransport, SimulatedRoom};
use ear_core::{BufferSize, Channel, EarConfig, SampleRate, SignalSource};
use ear_dsp::{Processor, ProcessorEvent, ProcessorEvents, ProcessorHandle};

/// How often status is reported
const REPORT_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Parser)]
#[command(name = "ear-host", about = "Adaptive acoustic equalization host")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List audio devices
    Devices,
    /// Print the default configuration as JSON
    Config,
    /// Run the engine
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// JSON configuration file (missing fields use defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use a simulated room instead of a sound card
    #[arg(long)]
    simulate: bool,

    /// Simulated echo delay in samples
    #[arg(long, default_value_t = 1200)]
    delay: usize,

    /// Simulated echo gain
    #[arg(long, default_value_t = 0.9)]
    gain: f64,

    /// Measure the round-trip latency before equalizing
    #[arg(long)]
    calibrate: bool,

    /// Reference signal source (overrides the config file)
    #[arg(long, value_enum)]
    source: Option<SourceArg>,

    /// Start with bypass on
    #[arg(long)]
    bypass: bool,

    /// Start with automatic adaption off
    #[arg(long)]
    no_adapt: bool,

    /// Sample rate in Hz
    #[arg(long, default_value_t = 48000)]
    sample_rate: u32,

    /// Frames per period
    #[arg(long, default_value_t = 1024)]
    buffer_size: u32,

    /// Capture device name
    #[arg(long)]
    input: Option<String>,

    /// Playback device name
    #[arg(long)]
    output: Option<String>,

    /// Run time in seconds
    #[arg(short, long, default_value_t = 30.0)]
    seconds: f64,

    /// Directory holding left.ear / right.ear control files
    #[arg(long)]
    controls: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    External,
    White,
    Pink,
}

impl From<SourceArg> for SignalSource {
    fn from(source: SourceArg) -> Self {
        match source {
            SourceArg::External => SignalSource::External,
            SourceArg::White => SignalSource::WhiteNoise,
            SourceArg::Pink => SignalSource::PinkNoise,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Config => print_default_config(),
        Commands::Run(args) => run(args),
    }
}

fn list_devices() -> Result<()> {
    println!("Host: {}", ear_audio::host_name());

    println!("\nInputs:");
    for device in ear_audio::list_input_devices()? {
        println!(
            "  {}{} ({} ch, {:?} Hz){}",
            device.name,
            if device.is_default { " [default]" } else { "" },
            device.input_channels,
            device.sample_rates,
            if device.has_reference_inputs() { ", reference inputs" } else { "" }
        );
    }

    println!("\nOutputs:");
    for device in ear_audio::list_output_devices()? {
        println!(
            "  {}{} ({} ch, {:?} Hz)",
            device.name,
            if device.is_default { " [default]" } else { "" },
            device.output_channels,
            device.sample_rates
        );
    }
    Ok(())
}

fn print_default_config() -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&EarConfig::default())?);
    Ok(())
}

fn load_config(args: &RunArgs) -> Result<EarConfig> {
    let mut config: EarConfig = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => EarConfig::default(),
    };

    if let Some(source) = args.source {
        config.signal_source = source.into();
    }
    config.bypass |= args.bypass;
    config.automatic_adaption &= !args.no_adapt;
    config.validate()?;
    Ok(config)
}

fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    let Some(sample_rate) = SampleRate::from_hz(args.sample_rate) else {
        bail!("unsupported sample rate {}", args.sample_rate);
    };
    let Some(buffer_size) = BufferSize::from_frames(args.buffer_size) else {
        bail!("unsupported buffer size {}", args.buffer_size);
    };

    let (processor, handle, mut events) = Processor::new(&config, sample_rate)?;
    if let Some(dir) = &args.controls {
        load_controls(&handle, dir);
    }

    let duration = Duration::from_secs_f64(args.seconds.max(0.0));

    if args.simulate {
        let mut room = SimulatedRoom::new(sample_rate, buffer_size, args.delay, args.gain);
        room.activate(Box::new(processor))?;
        if args.calibrate {
            handle.calibrate();
        }

        let period = buffer_size.as_usize() as f64 / sample_rate.as_f64();
        let periods = (args.seconds / period).ceil() as usize;
        let report_every = ((REPORT_INTERVAL.as_secs_f64() / period).ceil() as usize).max(1);

        let mut done = 0;
        while done < periods {
            let step = report_every.min(periods - done);
            room.run_periods(step)?;
            done += step;
            report(&handle, &mut events);
        }
        room.deactivate()?;
    } else {
        let mut transport = CpalTransport::new(AudioConfig {
            sample_rate,
            buffer_size,
            input_device: args.input.clone(),
            output_device: args.output.clone(),
            ..Default::default()
        })?;
        transport.activate(Box::new(processor))?;
        if args.calibrate {
            handle.calibrate();
        }

        let started = Instant::now();
        while started.elapsed() < duration {
            thread::sleep(REPORT_INTERVAL.min(duration.saturating_sub(started.elapsed())));
            report(&handle, &mut events);
        }
        transport.deactivate()?;
    }

    if let Some(dir) = &args.controls {
        save_controls(&handle, dir)?;
    }
    Ok(())
}

fn report(handle: &ProcessorHandle, events: &mut ProcessorEvents) {
    for event in events.drain() {
        match event {
            ProcessorEvent::CalibrationFinished { left, right } => {
                log::info!("Calibrated: left {} samples, right {} samples", left, right);
            }
        }
    }

    log::info!(
        "{:?} | mic {:.3}/{:.3} | ref {:.3}/{:.3} | latency {}/{}",
        handle.mode(),
        handle.microphone_level_left(),
        handle.microphone_level_right(),
        handle.signal_source_level_left(),
        handle.signal_source_level_right(),
        handle.left_latency(),
        handle.right_latency()
    );
}

fn control_file(dir: &Path, channel: Channel) -> PathBuf {
    match channel {
        Channel::Left => dir.join("left.ear"),
        Channel::Right => dir.join("right.ear"),
    }
}

/// Missing or broken files leave the controls at unity
fn load_controls(handle: &ProcessorHandle, dir: &Path) {
    for channel in Channel::BOTH {
        let path = control_file(dir, channel);
        match handle.equalizer(channel).load_from_file(&path) {
            Ok(count) => log::info!("Loaded {} controls from {}", count, path.display()),
            Err(e) => log::warn!("Not loading {}: {}", path.display(), e),
        }
    }
}

fn save_controls(handle: &ProcessorHandle, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    for channel in Channel::BOTH {
        let path = control_file(dir, channel);
        handle
            .equalizer(channel)
            .save_to_file(&path)
            .with_context(|| format!("saving {}", path.display()))?;
        log::info!("Saved controls to {}", path.display());
    }
    Ok(())
}
