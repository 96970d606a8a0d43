use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use audiometer::audio::list_output_devices;
use audiometer::ear::Ear;
use audiometer::response::{ButtonEvent, EventSource, InputSource, ResponseCapture};
use audiometer::session::{start_session, CancelToken, Session, SessionEvent, SessionObserver};
use audiometer::testing::SimulatedPatient;
use audiometer::threshold::Threshold;
use audiometer::{AppConfig, CpalBackend, FrequencyPreset};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug)]
#[command(
    name = "audiometer",
    about = "Pure-tone threshold audiometry (Modified Hughson-Westlake)"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a hearing test on the audio device; press Enter to respond, `q` to cancel
    Run {
        #[command(flatten)]
        config: ConfigArgs,
        /// Output device name (substring match)
        #[arg(long)]
        device: Option<String>,
    },
    /// List output devices
    Devices,
    /// Run a full session against a simulated patient, without audio
    Simulate {
        #[command(flatten)]
        config: ConfigArgs,
        /// Left ear threshold in dBHL
        #[arg(long, default_value_t = 20.0, allow_negative_numbers = true)]
        left: f32,
        /// Right ear threshold in dBHL
        #[arg(long, default_value_t = 20.0, allow_negative_numbers = true)]
        right: f32,
    },
    /// Print the effective configuration as JSON
    Config {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Frequency preset, replacing the configured frequency list
    #[arg(long, value_enum)]
    preset: Option<PresetArg>,
    /// Seed for ear order and pause randomization
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PresetArg {
    Full,
    Quick,
    Mini,
}

impl From<PresetArg> for FrequencyPreset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Full => FrequencyPreset::Full,
            PresetArg::Quick => FrequencyPreset::Quick,
            PresetArg::Mini => FrequencyPreset::Mini,
        }
    }
}

impl ConfigArgs {
    fn resolve(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::try_load_from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => AppConfig::default(),
        };
        if let Some(preset) = self.preset {
            config.session.frequencies = FrequencyPreset::from(preset).frequencies();
        }
        if self.seed.is_some() {
            config.session.seed = self.seed;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

/// Prints every session event as one JSON line on stdout
struct JsonLinesObserver;

impl JsonLinesObserver {
    fn emit(&self, event: SessionEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(err) => log::error!("[CLI] Failed to serialize event: {}", err),
        }
    }
}

impl SessionObserver for JsonLinesObserver {
    fn on_ear_changed(&mut self, ear: Ear) {
        eprintln!("Testing {} ear", ear);
        self.emit(SessionEvent::EarChanged { ear });
    }

    fn on_frequency_changed(&mut self, frequency: u32) {
        self.emit(SessionEvent::FrequencyChanged { frequency });
    }

    fn on_progress(&mut self, percent: u8) {
        self.emit(SessionEvent::Progress { percent });
    }

    fn on_threshold_determined(&mut self, ear: Ear, frequency: u32, threshold: Threshold) {
        self.emit(SessionEvent::ThresholdDetermined {
            ear,
            frequency,
            threshold,
        });
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("audiometer error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();
}

fn execute(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Run { config, device } => run_command(&config, device),
        Commands::Devices => devices_command(),
        Commands::Simulate {
            config,
            left,
            right,
        } => simulate_command(&config, left, right),
        Commands::Config { config } => {
            let config = config.resolve()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Each line on stdin is one press+release; `q` cancels the session
fn spawn_stdin_reader(events: mpsc::Sender<ButtonEvent>, cancel: CancelToken) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().eq_ignore_ascii_case("q") {
                cancel.cancel();
                break;
            }
            if events.send(ButtonEvent::Pressed).is_err()
                || events.send(ButtonEvent::Released).is_err()
            {
                break;
            }
        }
    });
}

fn run_command(args: &ConfigArgs, device: Option<String>) -> Result<ExitCode> {
    let mut config = args.resolve()?;
    if device.is_some() {
        config.tone.device = device;
    }

    let cancel = CancelToken::new();
    let response = Arc::new(ResponseCapture::new());
    let (tx, rx) = mpsc::channel();
    let mut source = EventSource::keyboard_hook(rx);
    source
        .attach(Arc::clone(&response))
        .context("attaching keyboard input")?;
    spawn_stdin_reader(tx, cancel.clone());

    eprintln!("Press Enter whenever you hear a tone. Type q and Enter to stop.");
    eprintln!("Press Enter to begin.");
    response.clear();
    if !response.wait_for_press_then_release(Duration::from_secs(60), Duration::from_secs(1)) {
        eprintln!("No input received, aborting.");
        return Ok(ExitCode::from(2));
    }

    let handle = start_session(
        config,
        Arc::new(CpalBackend::new()),
        Arc::clone(&response),
        Box::new(JsonLinesObserver),
        cancel,
    )
    .context("starting session")?;

    let summary = handle.join().context("session failed")?;
    source.detach();

    println!("{}", serde_json::to_string(&summary)?);
    if summary.cancelled {
        eprintln!("Session cancelled.");
    }
    Ok(ExitCode::SUCCESS)
}

fn devices_command() -> Result<ExitCode> {
    let devices = list_output_devices().context("listing output devices")?;
    for (index, name) in devices.iter().enumerate() {
        println!("{}: {}", index, name);
    }
    Ok(ExitCode::SUCCESS)
}

fn simulate_command(args: &ConfigArgs, left: f32, right: f32) -> Result<ExitCode> {
    let mut config = args.resolve()?;
    config.session.combination_pause_ms = 0;
    config.session.ear_switch_pause_ms = 0;

    let mut patient = SimulatedPatient::new(left, right).with_calibration(config.calibration.clone());
    let mut session = Session::new(config.session, CancelToken::new());
    let summary = session
        .run(&mut patient, &mut JsonLinesObserver)
        .context("simulated session failed")?;

    println!("{}", serde_json::to_string(&summary)?);
    log::info!(
        "[CLI] Simulation presented {} trials",
        patient.presented().len()
    );
    Ok(ExitCode::SUCCESS)
}
