//! unit-host: load an audio unit and drive it from the command line
//!
//! - `devices`: list audio devices
//! - `inspect`: print a unit's header, parameters and presets
//! - `probe`: render one period offline
//! - `run`: play the unit live with notes, the arpeggiator and the tuner

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use clap::{ArgAction, Args, Parser, Subcommand};

use unit_host_lib::audio::device::{list_input_devices, list_output_devices, AudioDeviceInfo};
use unit_host_lib::audio::midi::{parse_note_list, ArpPattern, KeyboardRouter, StepDivision};
use unit_host_lib::audio::pitch::NoteReading;
use unit_host_lib::audio::RenderEngine;
use unit_host_lib::config::HostConfig;
use unit_host_lib::error::{ConfigError, Error};
use unit_host_lib::logging;

/// Control loop period
const CONTROL_TICK: Duration = Duration::from_millis(2);
const STATUS_INTERVAL: Duration = Duration::from_secs(1);
const TUNER_INTERVAL: Duration = Duration::from_millis(250);

/// Host for runtime-loaded audio units
#[derive(Parser)]
#[command(name = "unit-host")]
#[command(about = "Load an audio unit and drive it in real time")]
#[command(version)]
struct Cli {
    /// Config file (default: <config-dir>/unit-host/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Write logs to the default log file instead of stderr
    #[arg(long, global = true)]
    log: bool,

    /// Write logs to this file instead of stderr (implies --log)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct AudioArgs {
    /// Sample rate in Hz
    #[arg(long)]
    rate: Option<u32>,

    /// Frames per period
    #[arg(long)]
    frames: Option<u16>,

    /// Output channels (1 or 2)
    #[arg(long)]
    channels: Option<u8>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Unit shared library
    #[arg(long)]
    unit: PathBuf,

    #[command(flatten)]
    audio: AudioArgs,

    /// Live input channels (0 disables input)
    #[arg(long)]
    input_channels: Option<u8>,

    /// Master volume, 0..1
    #[arg(long)]
    volume: Option<f32>,

    /// How long to play
    #[arg(long, default_value = "10")]
    seconds: f64,

    /// Parameter update, repeatable
    #[arg(long = "param", value_name = "ID=VALUE", value_parser = parse_param)]
    params: Vec<(u8, i32)>,

    /// Preset to load before playing
    #[arg(long)]
    preset: Option<u8>,

    /// Notes to hold, e.g. 60,64,67 or C4,E4,G4
    #[arg(long)]
    notes: Option<String>,

    /// Arpeggiate the held notes
    #[arg(long)]
    arp: bool,

    /// Latch arpeggiator notes
    #[arg(long)]
    hold: bool,

    #[arg(long)]
    bpm: Option<f32>,

    /// 1/4, 1/8, 1/16 or 1/32
    #[arg(long)]
    division: Option<StepDivision>,

    /// up, down, up-down or random
    #[arg(long)]
    pattern: Option<ArpPattern>,

    /// Gate length in percent of a step
    #[arg(long)]
    gate: Option<f32>,

    /// Print the detected pitch as a note reading
    #[arg(long)]
    tuner: bool,

    /// Tuner A4 reference in Hz
    #[arg(long)]
    reference: Option<f32>,
}

#[derive(Subcommand)]
enum Commands {
    /// List output and input devices
    Devices,

    /// Show a unit's header, parameters and presets
    Inspect {
        #[arg(long)]
        unit: PathBuf,
    },

    /// Load, initialize and render one period of silence without a device
    Probe {
        #[arg(long)]
        unit: PathBuf,

        #[command(flatten)]
        audio: AudioArgs,
    },

    /// Play a unit through the output device
    Run(RunArgs),
}

fn parse_param(text: &str) -> Result<(u8, i32), String> {
    let (id, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected ID=VALUE, got '{}'", text))?;
    let id = id
        .trim()
        .parse::<u8>()
        .map_err(|e| format!("invalid parameter id '{}': {}", id, e))?;
    let value = value
        .trim()
        .parse::<i32>()
        .map_err(|e| format!("invalid parameter value '{}': {}", value, e))?;
    Ok((id, value))
}

/// File logging target: an explicit path wins, `--log` alone picks the default
fn log_target(log: bool, log_file: Option<PathBuf>) -> Option<PathBuf> {
    log_file.or_else(|| log.then(logging::default_log_path))
}

fn load_config(path: Option<&Path>) -> Result<HostConfig, ConfigError> {
    match path {
        Some(path) => HostConfig::load(path),
        None => HostConfig::load_or_default(),
    }
}

fn apply_audio_args(config: &mut HostConfig, args: &AudioArgs) -> Result<(), ConfigError> {
    if let Some(rate) = args.rate {
        config.audio.sample_rate = rate;
    }
    if let Some(frames) = args.frames {
        config.audio.frames_per_period = frames;
    }
    if let Some(channels) = args.channels {
        config.audio.output_channels = channels;
    }
    config.validate()
}

fn print_devices(title: &str, devices: &[AudioDeviceInfo]) {
    println!("{}:", title);
    if devices.is_empty() {
        println!("  (none)");
    }
    for device in devices {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  {}{}", device.name, marker);
    }
}

fn cmd_devices() -> Result<(), Error> {
    print_devices("Output devices", &list_output_devices()?);
    print_devices("Input devices", &list_input_devices()?);
    Ok(())
}

fn cmd_inspect(config: HostConfig, unit: &Path) -> Result<(), Error> {
    let mut engine = RenderEngine::new(config.engine_options())?;
    let info = engine.load_unit(unit)?;
    engine.initialize_unit()?;

    println!("{}", info.name);
    println!("  vendor     {}", info.vendor_tag());
    println!("  unit id    {:#010x}", info.unit_id);
    println!("  version    {}", info.version_string());
    println!("  api        {}", info.api_string());
    println!("  category   {:?}", info.category());
    println!("  {:?}", engine.capabilities());

    println!("Parameters ({}):", info.params.len());
    for (id, param) in info.params.iter().enumerate() {
        let id = id as u8;
        let default = engine
            .parameter_display(id, param.default as i32)
            .unwrap_or_default();
        println!(
            "  {:>2}  {:<12} {:>6} .. {:<6} default {} ({})",
            id, param.name, param.min, param.max, param.default, default
        );
    }

    println!("Presets ({}):", info.preset_count);
    for index in 0..info.preset_count.min(u8::MAX as u32 + 1) {
        let name = engine.preset_name(index as u8).unwrap_or_else(|| "-".to_string());
        println!("  {:>3}  {}", index, name);
    }
    Ok(())
}

fn cmd_probe(mut config: HostConfig, unit: &Path, audio: &AudioArgs) -> Result<(), Error> {
    apply_audio_args(&mut config, audio)?;
    let frames = config.audio.frames_per_period as usize;
    let channels = config.audio.output_channels as usize;

    let mut engine = RenderEngine::new(config.engine_options())?;
    let info = engine.load_unit(unit)?;
    let output = engine.render_offline(frames)?;

    let peak = output.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
    let perf = engine.perf();
    println!(
        "{}: rendered {} frames x {} channels at {} Hz",
        info.name, frames, channels, config.audio.sample_rate
    );
    println!("  first samples {:?}", &output[..output.len().min(8)]);
    println!("  peak {:.4}, render {:.1} us", peak, perf.render_max_us);
    Ok(())
}

fn cmd_run(mut config: HostConfig, args: RunArgs) -> Result<(), Error> {
    apply_audio_args(&mut config, &args.audio)?;
    if let Some(channels) = args.input_channels {
        config.audio.input_channels = channels;
    }
    if let Some(volume) = args.volume {
        config.audio.master_volume = volume;
    }
    if let Some(reference) = args.reference {
        config.tuner_reference_hz = reference;
    }
    let arp = &mut config.arpeggiator;
    arp.enabled |= args.arp;
    arp.hold |= args.hold;
    if let Some(bpm) = args.bpm {
        arp.bpm = bpm;
    }
    if let Some(division) = args.division {
        arp.division = division;
    }
    if let Some(pattern) = args.pattern {
        arp.pattern = pattern;
    }
    if let Some(gate) = args.gate {
        arp.gate_length = gate;
    }
    config.normalize();
    config.validate()?;

    let notes = match &args.notes {
        Some(text) => parse_note_list(text).map_err(ConfigError::Invalid)?,
        None => Vec::new(),
    };

    let mut engine = RenderEngine::new(config.engine_options())?;
    let info = engine.load_unit(&args.unit)?;
    println!("Loaded {} ({} params, {} presets)", info.name, info.params.len(), info.preset_count);

    for &(id, value) in &args.params {
        let applied = engine.enqueue_parameter(id, value)?;
        log::info!(
            "Parameter {} = {} ({})",
            id,
            applied,
            engine.parameter_display(id, applied).unwrap_or_default()
        );
    }
    if let Some(index) = args.preset {
        engine.load_preset(index)?;
        if let Some(name) = engine.preset_name(index) {
            log::info!("Preset {}: {}", index, name);
        }
    }
    if engine.capabilities().tempo {
        engine.set_tempo(config.arpeggiator.bpm)?;
    }

    engine.start()?;

    // Hold and enable go through the router so its note sets stay consistent
    let mut settings = config.arpeggiator.clone();
    let (arp_enabled, hold) = (settings.enabled, settings.hold);
    settings.enabled = false;
    settings.hold = false;
    let mut router = KeyboardRouter::new(settings);
    router.set_hold(hold, &mut engine);
    router.set_arpeggiator_enabled(arp_enabled, &mut engine);
    for &note in &notes {
        router.press(note, &mut engine);
    }

    println!(
        "Playing for {:.1} s{}",
        args.seconds,
        if arp_enabled {
            format!(
                " (arpeggiator {} {} at {} BPM)",
                router.arpeggiator().settings().pattern,
                router.arpeggiator().settings().division,
                router.arpeggiator().settings().bpm
            )
        } else {
            String::new()
        }
    );

    let started = Instant::now();
    let deadline = Duration::try_from_secs_f64(args.seconds).unwrap_or(Duration::ZERO);
    let mut last_status = Instant::now();
    let mut last_tuner = Instant::now();

    while started.elapsed() < deadline {
        router.advance(&mut engine);

        if last_status.elapsed() >= STATUS_INTERVAL {
            last_status = Instant::now();
            log::info!(
                "CPU {:.1}%, pitch {:.1} Hz, underruns {}",
                engine.cpu_load() * 100.0,
                engine.detected_pitch(),
                engine.perf().underruns
            );
        }

        if args.tuner && last_tuner.elapsed() >= TUNER_INTERVAL {
            last_tuner = Instant::now();
            match NoteReading::from_frequency(engine.detected_pitch(), config.tuner_reference_hz) {
                Some(reading) => println!(
                    "{:<4} {:>8.2} Hz {:>+7.1} cents",
                    reading.name, reading.frequency, reading.cents
                ),
                None => println!("--"),
            }
        }

        thread::sleep(CONTROL_TICK);
    }

    router.release_all(&mut engine);
    engine.stop();

    let perf = engine.perf();
    println!("Performance:");
    println!(
        "  render min/avg/max  {:.1} / {:.1} / {:.1} us over {} periods",
        perf.render_min_us, perf.render_avg_us, perf.render_max_us, perf.render_count
    );
    println!("  cpu load            {:.1}%", perf.cpu_load * 100.0);
    println!("  underruns           {}", perf.underruns);
    println!("  clamped periods     {}", perf.clamped_periods);
    Ok(())
}

fn run(cli: Cli) -> Result<(), Error> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Devices => cmd_devices(),
        Commands::Inspect { unit } => cmd_inspect(config, &unit),
        Commands::Probe { unit, audio } => cmd_probe(config, &unit, &audio),
        Commands::Run(args) => cmd_run(config, args),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let log_path = log_target(cli.log, cli.log_file.clone());
    logging::init_logging(level, log_path.as_deref());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("3=-20").unwrap(), (3, -20));
        assert_eq!(parse_param(" 0 = 7 ").unwrap(), (0, 7));
        assert!(parse_param("3").is_err());
        assert!(parse_param("300=1").is_err());
    }

    #[test]
    fn test_log_target() {
        assert_eq!(log_target(false, None), None);
        assert_eq!(log_target(true, None), Some(logging::default_log_path()));

        let explicit = PathBuf::from("/tmp/host.log");
        assert_eq!(log_target(false, Some(explicit.clone())), Some(explicit.clone()));
        assert_eq!(log_target(true, Some(explicit.clone())), Some(explicit));

        let cli = Cli::try_parse_from(["unit-host", "devices", "--log"]).unwrap();
        assert!(cli.log);
        assert!(cli.log_file.is_none());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "unit-host", "run", "--unit", "synth.so", "--param", "1=40", "--param", "2=-3",
            "--notes", "C4,E4", "--arp", "--pattern", "up-down", "--division", "1/8",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.params, vec![(1, 40), (2, -3)]);
                assert_eq!(args.pattern, Some(ArpPattern::UpDown));
                assert_eq!(args.division, Some(StepDivision::Eighth));
                assert!(args.arp);
                assert_eq!(args.seconds, 10.0);
            }
            _ => panic!("expected run"),
        }
    }
}
