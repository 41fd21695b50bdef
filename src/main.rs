mod app;
mod audio;
mod command;
mod config;
mod control;
mod controller;
mod midi;
mod osc;
mod params;
mod sequencer;
mod ui;

use std::fs::File;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use app::{App, AppConfig};
use audio::EngineShared;
use params::ParamId;
use sequencer::clock::DEFAULT_BPM;
use sequencer::ClockMode;
use ui::Theme;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ClockArg {
    Host,
    Midi,
    Manual,
}

impl From<ClockArg> for ClockMode {
    fn from(arg: ClockArg) -> Self {
        match arg {
            ClockArg::Host => ClockMode::Host,
            ClockArg::Midi => ClockMode::MidiClock,
            ClockArg::Manual => ClockMode::Manual,
        }
    }
}

/// Amenchop - 16-step Amen break chopper with MIDI and OSC control
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Theme to use for the interface
    #[arg(long, default_value = "default")]
    theme: String,

    /// List available themes and exit
    #[arg(long)]
    list_themes: bool,

    /// List MIDI ports and exit
    #[arg(long)]
    list_midi: bool,

    /// MIDI input port (case-insensitive substring of the port name)
    #[arg(long)]
    midi_in: Option<String>,

    /// MIDI output port (case-insensitive substring of the port name)
    #[arg(long)]
    midi_out: Option<String>,

    /// Host that receives outgoing OSC messages
    #[arg(long)]
    osc_host: Option<String>,

    #[arg(long)]
    osc_send_port: Option<u16>,

    #[arg(long)]
    osc_receive_port: Option<u16>,

    /// Tempo source
    #[arg(long, value_enum)]
    clock: Option<ClockArg>,

    /// Tempo of the built-in transport
    #[arg(long, default_value_t = DEFAULT_BPM)]
    bpm: f64,

    /// Tempo used by the manual clock
    #[arg(long)]
    manual_bpm: Option<f32>,

    /// WAV file or built-in sample name to load on startup
    #[arg(long)]
    sample: Option<String>,

    /// Settings file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Do not open an audio input device
    #[arg(long)]
    no_input: bool,

    /// Start the transport immediately
    #[arg(long)]
    play: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    use simplelog::{Config, LevelFilter, WriteLogger};

    let log_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    let log_path = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("amenchop")
        .join("amenchop.log");

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    // The TUI owns the terminal, so a log we cannot open is simply skipped
    let Ok(log_file) =
        File::create(&log_path).or_else(|_| File::create("/tmp/amenchop.log"))
    else {
        return;
    };
    if WriteLogger::init(log_level, Config::default(), log_file).is_err() {
        return;
    }

    log::info!("amenchop starting (log level: {:?})", log_level);
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --list-themes
    if args.list_themes {
        println!("Available themes:");
        for theme in Theme::available_themes() {
            println!("  {}", theme);
        }
        return Ok(());
    }

    if args.list_midi {
        println!("MIDI inputs:");
        for port in midi::list_input_ports() {
            println!("  {}: {}", port.index, port.name);
        }
        println!("MIDI outputs:");
        for port in midi::list_output_ports() {
            println!("  {}: {}", port.index, port.name);
        }
        return Ok(());
    }

    init_logging(args.verbose);

    // Load theme
    let theme = Theme::from_name(&args.theme).unwrap_or_else(|| {
        eprintln!(
            "Warning: Unknown theme '{}', using default. Use --list-themes to see available themes.",
            args.theme
        );
        Theme::default()
    });

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(config::default_settings_path);
    let settings = config::load_or_default(&settings_path).unwrap_or_else(|e| {
        eprintln!("Warning: {:#}. Using default settings.", e);
        config::Settings::default()
    });

    let shared = EngineShared::default();
    settings.apply(&shared.params);

    // Command line wins over the settings file
    let params = &shared.params;
    if let Some(port) = args.osc_send_port {
        params.set(ParamId::OscSendPort, port as f32);
    }
    if let Some(port) = args.osc_receive_port {
        params.set(ParamId::OscReceivePort, port as f32);
    }
    if let Some(clock) = args.clock {
        params.set(ParamId::ClockMode, ClockMode::from(clock).value());
    }
    if let Some(bpm) = args.manual_bpm {
        params.set(ParamId::ManualBpm, bpm);
    }

    let config = AppConfig {
        theme,
        shared,
        settings_path,
        osc_host: args.osc_host.unwrap_or(settings.osc_host),
        midi_in: args.midi_in,
        midi_out: args.midi_out,
        with_input: !args.no_input,
        transport_bpm: args.bpm,
        sample: args.sample.or(settings.sample),
        autoplay: args.play,
    };

    // Run the TUI application
    let mut app = App::new(config)?;
    app.run()
}
