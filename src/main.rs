// SweetYaar - run the toy's control core on a desktop
// Sound card + terminal remote by default, or a paced null sink + stdin console with --headless

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use sweetyaar::audio::AudioOutput;
use sweetyaar::control::{ControlExit, Controller, Interface};
use sweetyaar::device::{BatteryGauge, HostLifecycle, SystemClock, SysfsBattery};
use sweetyaar::ui::{ConsoleInterface, JsonStateLogger};
use sweetyaar::{AudioLibrary, Config, DevicePorts, NullOutput};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

// asks a supervisor (systemd, a shell loop) to start us again
const EXIT_RESTART: u8 = 75;

#[derive(Parser)]
#[command(name = "sweetyaar")]
#[command(about = "🐘 SweetYaar - the audio toy's control core")]
#[command(version)]
struct Args {
    /// Config file (default: the user config dir, created on first run)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also log to stderr
    #[arg(long)]
    dev: bool,

    /// No sound card, no terminal UI: commands on stdin, state as JSON on stdout
    #[arg(long)]
    headless: bool,
}

fn init_logging(dev: bool) -> Result<WorkerGuard> {
    let log_dir = PathBuf::from("logs");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotating file appender
    let file_appender = tracing_appender::rolling::daily(&log_dir, "sweetyaar.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let base_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sweetyaar=debug"));

    let builder = tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .with_env_filter(base_filter);

    if dev {
        let subscriber = builder
            .with_writer(file_writer.and(std::io::stderr))
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
        eprintln!("🔧 Dev mode: logging to stderr + file");
    } else {
        let subscriber = builder.with_writer(file_writer).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(guard)
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // keep the guard alive or buffered log lines are lost on exit
    let _log_guard = init_logging(args.dev)?;
    info!("🐘 SweetYaar starting (headless: {})", args.headless);

    let config = load_config(args.config.as_ref()).context("loading config")?;
    let library = AudioLibrary::from_config(&config.library).context("scanning sound library")?;

    let shutdown = CancellationToken::new();
    let lifecycle = Arc::new(HostLifecycle::new(shutdown.clone()));
    let battery = SysfsBattery::detect().map(|gauge| Arc::new(gauge) as Arc<dyn BatteryGauge>);

    let controller = Controller::new(
        &config,
        library,
        DevicePorts {
            lifecycle: lifecycle.clone(),
            clock: Arc::new(SystemClock),
            battery,
        },
        shutdown.clone(),
    )?;

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received");
                shutdown.cancel();
            }
        });
    }

    let (interfaces, output) = if args.headless {
        headless_front(&controller, &config)
    } else {
        interactive_front(&controller, &config)?
    };

    let exit = controller.take_control(interfaces, output).await;

    if exit == ControlExit::OutputFailed || lifecycle.restart_requested() {
        warn!("exiting for restart ({:?})", exit);
        return Ok(ExitCode::from(EXIT_RESTART));
    }
    info!("👋 bye");
    Ok(ExitCode::SUCCESS)
}

fn headless_front(controller: &Controller, config: &Config) -> (Vec<Box<dyn Interface>>, Box<dyn AudioOutput>) {
    controller.subscribe(Arc::new(JsonStateLogger::stdout()));
    let interfaces: Vec<Box<dyn Interface>> = vec![Box::new(ConsoleInterface::stdin())];
    (interfaces, Box::new(NullOutput::new(config.audio.format())))
}

#[cfg(feature = "tui")]
fn interactive_front(controller: &Controller, config: &Config) -> Result<(Vec<Box<dyn Interface>>, Box<dyn AudioOutput>)> {
    let remote = sweetyaar::ui::TerminalRemote::new();
    controller.subscribe(remote.view());
    let interfaces: Vec<Box<dyn Interface>> = vec![Box::new(remote)];
    Ok((interfaces, host_output(config)))
}

#[cfg(not(feature = "tui"))]
fn interactive_front(controller: &Controller, config: &Config) -> Result<(Vec<Box<dyn Interface>>, Box<dyn AudioOutput>)> {
    warn!("built without the terminal remote, using the console");
    let (interfaces, _) = headless_front(controller, config);
    Ok((interfaces, host_output(config)))
}

#[cfg(feature = "audio")]
fn host_output(config: &Config) -> Box<dyn AudioOutput> {
    match sweetyaar::audio::output::RodioOutput::open(config.audio.format()) {
        Ok(output) => Box::new(output),
        Err(e) => {
            error!("no sound card ({}), playing into the void", e);
            Box::new(NullOutput::new(config.audio.format()))
        }
    }
}

#[cfg(not(feature = "audio"))]
fn host_output(config: &Config) -> Box<dyn AudioOutput> {
    info!("built without host audio, using the null output");
    Box::new(NullOutput::new(config.audio.format()))
}
