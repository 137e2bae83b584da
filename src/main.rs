//! MIDI Player front panel
//!
//! Menu-driven MIDI box: input/output port selection, Bluetooth MIDI pairing,
//! sound banks and MIDI file playback.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use midiplayer::bluetooth::Bluetoothctl;
use midiplayer::config::{AppConfig, LoggingConfig};
use midiplayer::diagnostics;
use midiplayer::display::ConsoleDisplay;
use midiplayer::engine::{OxiEngine, SilentEngine, SoundEngine};
use midiplayer::keypad::{spawn_keypad, KeypadCommand, KEYPAD_HELP};
use midiplayer::menu::{Collaborators, Menu};
use midiplayer::midi::MidirBackend;
use midiplayer::paths::AppPaths;

/// MIDI Player - front panel for ports, Bluetooth MIDI, sound banks and playback
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (auto-detected when absent)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// List available MIDI ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Run one Bluetooth discovery pass and exit
    #[arg(long)]
    scan: bool,

    /// Start with Bluetooth enabled
    #[arg(long)]
    bluetooth: bool,

    /// Do not open an audio device; the local synth stays silent
    #[arg(long)]
    no_audio: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config_path = AppPaths::detect_config(args.config.as_deref());
    let mut config = AppConfig::load_or_default(&config_path)
        .await
        .with_context(|| format!("Loading {}", config_path.display()))?;
    if args.bluetooth {
        config.bluetooth.enabled = true;
    }

    let level = args
        .log_level
        .clone()
        .or_else(|| config.logging.level.clone())
        .unwrap_or_else(|| "info".to_string());
    let _log_guard = init_logging(&level, &config.logging)?;

    info!("Starting MIDI Player v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", config_path.display());

    let backend = Arc::new(MidirBackend::new(config.midi.client_name.clone()));
    let agent = Arc::new(Bluetoothctl::new(
        config.bluetooth.agent.clone(),
        config.bluetooth.command_delay(),
    ));

    if args.list_ports {
        diagnostics::list_ports_formatted(backend.as_ref());
        return Ok(());
    }
    if args.scan {
        diagnostics::scan_formatted(agent.as_ref(), &config.bluetooth).await;
        return Ok(());
    }

    let engine: Arc<dyn SoundEngine> = if args.no_audio {
        info!("Audio disabled, local synth is silent");
        Arc::new(SilentEngine::new())
    } else {
        match OxiEngine::start(&config.engine) {
            Ok(engine) => Arc::new(engine),
            Err(e) => {
                warn!("{}; continuing without audio", e);
                Arc::new(SilentEngine::new())
            }
        }
    };

    let paths = AppPaths::new(config_path, &config.paths);
    let display = Box::new(ConsoleDisplay::new(config.display.rows));
    let mut menu = Menu::new(
        config,
        paths,
        Collaborators {
            backend,
            agent,
            engine,
            display,
        },
    );

    let (keypad_tx, mut keypad_rx) = mpsc::channel::<KeypadCommand>(16);
    spawn_keypad(keypad_tx).context("Starting keypad")?;
    info!("Keys: {}", KEYPAD_HELP);

    menu.start().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            command = keypad_rx.recv() => match command {
                Some(KeypadCommand::Press(event)) => menu.handle(event).await,
                Some(KeypadCommand::Quit) | None => {
                    info!("Keypad closed, stopping");
                    break;
                }
            },

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping");
                break;
            }
        }
    }

    menu.shutdown();
    info!("MIDI Player shutdown complete");
    Ok(())
}

/// Console logging on stderr (stdout belongs to the panel), plus a daily
/// rolling file when a log directory is configured
fn init_logging(level: &str, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match &logging.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "midiplayer.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
}
